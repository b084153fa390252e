//! Tempdir-backed integration tests against a real on-disk SQLite file
//! (as opposed to the `sqlite::memory:` pool used by the in-module unit
//! tests in `src/storage.rs`), grounded in the teacher's bench-harness
//! setup (`benches/api_benchmarks.rs`'s `setup_test_server`).

use hotgrid::db;
use hotgrid::model::{CellBoundingBox, GridCell, LatLon};
use hotgrid::storage;
use tempfile::TempDir;

async fn temp_pools() -> (hotgrid::db::DbPools, TempDir) {
    let temp_dir = TempDir::new().expect("failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let pools = db::init_pool(&database_url).await.expect("failed to init pool");
    db::run_migrations(&pools).await.expect("failed to run migrations");
    (pools, temp_dir)
}

fn cell(x: i64, y: i64, obs: i64, taxa: i64) -> GridCell {
    GridCell {
        x,
        y,
        zoom: Some(15),
        observations_count: Some(obs),
        taxa_count: Some(taxa),
        bounding_box: Some(CellBoundingBox {
            top_left: LatLon { latitude: 60.0, longitude: 10.0 },
            bottom_right: LatLon { latitude: 59.9, longitude: 10.1 },
        }),
    }
}

/// A taxon active across a multi-slot window must report its true
/// observation count once, not once per matching `(year, slot)` bucket.
/// Regression test for the `hotmap_taxa_set` semi-join fix in
/// `storage::query_cell_taxa`: an `INNER JOIN` on the active-taxa set
/// fans out one `taxon_grid` row per matching bucket before the `SUM`,
/// inflating the total by the bucket count.
#[tokio::test]
async fn cell_taxa_window_does_not_inflate_observations_across_slots() {
    let (pools, _temp_dir) = temp_pools().await;

    for slot in [20, 21, 22] {
        let cells = vec![cell(17000, 9500, 10, 1)];
        storage::replace_taxon_grid(&pools, 1, 15, 2024, slot, &cells).await.unwrap();
        storage::rebuild_hotmap(&pools, 15, 2024, slot, &[1], 2.0, 0.5).await.unwrap();
    }

    let taxa = storage::query_cell_taxa(&pools, 15, &[2024], &[20, 21, 22], 17000, 9500, 50)
        .await
        .unwrap();

    assert_eq!(taxa.len(), 1);
    assert_eq!(taxa[0].taxon_id, 1);
    // 10 obs in each of 3 slots, summed once per slot: 30, not 30*3.
    assert_eq!(taxa[0].observations_count, 30);
}

/// Same inflation risk across a multi-year range rather than a multi-slot
/// window: a taxon active in every year of the range must not have its
/// per-cell observation total multiplied by the number of years.
#[tokio::test]
async fn cell_taxa_window_does_not_inflate_observations_across_years() {
    let (pools, _temp_dir) = temp_pools().await;

    for year in [2022, 2023, 2024] {
        let cells = vec![cell(17000, 9500, 5, 1)];
        storage::replace_taxon_grid(&pools, 7, 15, year, 0, &cells).await.unwrap();
        storage::rebuild_hotmap(&pools, 15, year, 0, &[7], 2.0, 0.5).await.unwrap();
    }

    let taxa = storage::query_cell_taxa(&pools, 15, &[2022, 2023, 2024], &[0], 17000, 9500, 50)
        .await
        .unwrap();

    assert_eq!(taxa.len(), 1);
    assert_eq!(taxa[0].observations_count, 15);
}

/// A taxon only active in one of the selected buckets must not be dropped
/// or double counted relative to a taxon active in all of them.
#[tokio::test]
async fn cell_taxa_window_mixed_activity_across_slots() {
    let (pools, _temp_dir) = temp_pools().await;

    for slot in [20, 21, 22] {
        let cells = vec![cell(17000, 9500, 4, 1)];
        storage::replace_taxon_grid(&pools, 1, 15, 2024, slot, &cells).await.unwrap();
    }
    let cells = vec![cell(17000, 9500, 9, 1)];
    storage::replace_taxon_grid(&pools, 2, 15, 2024, 20, &cells).await.unwrap();

    for slot in [20, 21, 22] {
        storage::rebuild_hotmap(&pools, 15, 2024, slot, &[1, 2], 2.0, 0.5).await.unwrap();
    }

    let taxa = storage::query_cell_taxa(&pools, 15, &[2024], &[20, 21, 22], 17000, 9500, 50)
        .await
        .unwrap();

    let taxon1 = taxa.iter().find(|t| t.taxon_id == 1).unwrap();
    let taxon2 = taxa.iter().find(|t| t.taxon_id == 2).unwrap();
    assert_eq!(taxon1.observations_count, 12); // 4 obs x 3 slots
    assert_eq!(taxon2.observations_count, 9); // 9 obs x 1 slot
}

/// Derived-zoom materialization and a subsequent hotmap rebuild survive a
/// real file-backed pool across separate transactions, not just an
/// in-memory connection held open for the test's lifetime.
#[tokio::test]
async fn materialize_and_rebuild_round_trip_on_disk() {
    let (pools, _temp_dir) = temp_pools().await;

    let cells = vec![cell(34000, 19000, 10, 1), cell(34001, 19000, 5, 2)];
    storage::replace_taxon_grid(&pools, 42, 15, 0, 0, &cells).await.unwrap();
    storage::upsert_layer_state(&pools, 42, 15, 0, 0, "src-sha", 2).await.unwrap();

    storage::materialize_parent_zoom_from_child(&pools, 42, 0, 0, 15, 14, "src-sha")
        .await
        .unwrap();

    let state = storage::get_layer_state(&pools, 42, 14, 0, 0).await.unwrap().unwrap();
    assert_eq!(state.payload_sha256, "LOCAL_FROM_15:src-sha");

    storage::rebuild_hotmap(&pools, 14, 0, 0, &[42], 2.0, 0.5).await.unwrap();
    let tiles = storage::query_hotmap(&pools, 14, &[0], &[0]).await.unwrap();
    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0].coverage, 1);
    assert_eq!(tiles[0].obs_total, 15);
}
