//! Relational storage engine: per-taxon grids, layer-state watermarks,
//! hotmap materialization, and the taxa dictionary. Writers run each
//! logical operation inside a transaction; readers run in autocommit.

use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};

use crate::db::{query_with_timeout, DbPools};
use crate::error::CoreError;
use crate::hash::local_from_marker;
use crate::model::GridCell;
use crate::tiles::{tile_bbox, BBox};

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// All-time / all-years sentinel values.
pub const SLOT_ALL_TIME: i64 = 0;
pub const YEAR_ALL_YEARS: i64 = 0;

#[derive(Debug, Clone)]
pub struct LayerState {
    pub last_fetch_utc: String,
    pub payload_sha256: String,
    pub grid_cell_count: i64,
}

#[derive(Debug, Clone)]
pub struct HotmapTile {
    pub zoom: i64,
    pub x: i64,
    pub y_tile: i64,
    pub coverage: i64,
    pub score: f64,
    pub obs_total: i64,
    pub bbox: BBox,
}

#[derive(Debug, Clone)]
pub struct CellTaxon {
    pub taxon_id: i64,
    pub scientific_name: Option<String>,
    pub swedish_name: Option<String>,
    pub observations_count: i64,
}

/// DELETE then bulk-INSERT every cell for `(taxon_id, zoom, year, slot_id)`
/// in one transaction. `cells` must not contain duplicate `(x, y)`.
pub async fn replace_taxon_grid(
    pools: &DbPools,
    taxon_id: i64,
    zoom: u32,
    year: i64,
    slot_id: i64,
    cells: &[GridCell],
) -> Result<(), CoreError> {
    let mut tx: Transaction<'_, Sqlite> = query_with_timeout(pools.write().begin())
        .await
        .map_err(|e| e.into_core_error("starting replace_taxon_grid transaction"))?;

    sqlx::query(
        "DELETE FROM taxon_grid WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
    )
    .bind(taxon_id)
    .bind(zoom as i64)
    .bind(year)
    .bind(slot_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::Internal(format!("deleting taxon_grid rows: {e}")))?;

    let now = now_iso();
    for cell in cells {
        let (top_lat, left_lon, bottom_lat, right_lon) = cell.bbox();
        sqlx::query(
            r#"INSERT INTO taxon_grid (
                taxon_id, zoom, year, slot_id, x, y_tile,
                observations_count, taxa_count,
                bbox_top_lat, bbox_left_lon, bbox_bottom_lat, bbox_right_lon,
                fetched_at_utc
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(taxon_id)
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .bind(cell.x)
        .bind(cell.y)
        .bind(cell.observations_count_or_zero())
        .bind(cell.taxa_count_or_zero())
        .bind(top_lat)
        .bind(left_lon)
        .bind(bottom_lat)
        .bind(right_lon)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("inserting taxon_grid row: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| CoreError::Internal(format!("committing replace_taxon_grid: {e}")))?;
    Ok(())
}

pub async fn upsert_layer_state(
    pools: &DbPools,
    taxon_id: i64,
    zoom: u32,
    year: i64,
    slot_id: i64,
    payload_sha256: &str,
    grid_cell_count: i64,
) -> Result<(), CoreError> {
    let now = now_iso();
    query_with_timeout(
        sqlx::query(
            r#"INSERT INTO taxon_layer_state (taxon_id, zoom, year, slot_id, last_fetch_utc, payload_sha256, grid_cell_count)
               VALUES (?,?,?,?,?,?,?)
               ON CONFLICT(taxon_id, zoom, year, slot_id) DO UPDATE SET
                 last_fetch_utc = excluded.last_fetch_utc,
                 payload_sha256 = excluded.payload_sha256,
                 grid_cell_count = excluded.grid_cell_count"#,
        )
        .bind(taxon_id)
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .bind(&now)
        .bind(payload_sha256)
        .bind(grid_cell_count)
        .execute(pools.write()),
    )
    .await
    .map_err(|e| e.into_core_error("upserting taxon_layer_state"))?;
    Ok(())
}

pub async fn get_layer_state(
    pools: &DbPools,
    taxon_id: i64,
    zoom: u32,
    year: i64,
    slot_id: i64,
) -> Result<Option<LayerState>, CoreError> {
    let row = query_with_timeout(
        sqlx::query(
            "SELECT last_fetch_utc, payload_sha256, grid_cell_count FROM taxon_layer_state
             WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
        )
        .bind(taxon_id)
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .fetch_optional(pools.read()),
    )
    .await
    .map_err(|e| e.into_core_error("reading taxon_layer_state"))?;

    Ok(row.map(|r| LayerState {
        last_fetch_utc: r.get(0),
        payload_sha256: r.get(1),
        grid_cell_count: r.get(2),
    }))
}

/// Aggregates child-zoom rows up to `dst_zoom` by integer-dividing `(x, y)`
/// by `2^(src_zoom - dst_zoom)`, sums `observations_count`, and takes the
/// max `taxa_count` among children sharing the destination cell (see
/// DESIGN.md for why MAX was chosen over SUM). Writes the
/// `LOCAL_FROM_<src>:<sha>` marker as layer state.
pub async fn materialize_parent_zoom_from_child(
    pools: &DbPools,
    taxon_id: i64,
    year: i64,
    slot_id: i64,
    src_zoom: u32,
    dst_zoom: u32,
    src_sha: &str,
) -> Result<(), CoreError> {
    if dst_zoom >= src_zoom {
        return Err(CoreError::Internal(format!(
            "materialize_parent_zoom_from_child requires dst_zoom < src_zoom (got {dst_zoom} >= {src_zoom})"
        )));
    }
    let factor: i64 = 1i64 << (src_zoom - dst_zoom);

    let rows = query_with_timeout(
        sqlx::query(
            "SELECT x, y_tile, observations_count, taxa_count FROM taxon_grid
             WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
        )
        .bind(taxon_id)
        .bind(src_zoom as i64)
        .bind(year)
        .bind(slot_id)
        .fetch_all(pools.read()),
    )
    .await
    .map_err(|e| e.into_core_error("reading children for parent-zoom derivation"))?;

    use std::collections::BTreeMap;
    let mut aggregated: BTreeMap<(i64, i64), (i64, i64)> = BTreeMap::new();
    for row in rows {
        let x: i64 = row.get(0);
        let y: i64 = row.get(1);
        let obs: i64 = row.get(2);
        let taxa: i64 = row.get(3);
        let key = (x.div_euclid(factor), y.div_euclid(factor));
        let entry = aggregated.entry(key).or_insert((0, 0));
        entry.0 += obs;
        entry.1 = entry.1.max(taxa);
    }

    let mut tx: Transaction<'_, Sqlite> = query_with_timeout(pools.write().begin())
        .await
        .map_err(|e| e.into_core_error("starting parent-zoom transaction"))?;

    sqlx::query(
        "DELETE FROM taxon_grid WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
    )
    .bind(taxon_id)
    .bind(dst_zoom as i64)
    .bind(year)
    .bind(slot_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::Internal(format!("clearing destination zoom: {e}")))?;

    let now = now_iso();
    for ((dst_x, dst_y), (observations, taxa_count)) in &aggregated {
        let (top_lat, left_lon, bottom_lat, right_lon) =
            tile_bbox(dst_zoom, *dst_x as u32, *dst_y as u32);
        sqlx::query(
            r#"INSERT INTO taxon_grid (
                taxon_id, zoom, year, slot_id, x, y_tile,
                observations_count, taxa_count,
                bbox_top_lat, bbox_left_lon, bbox_bottom_lat, bbox_right_lon,
                fetched_at_utc
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(taxon_id)
        .bind(dst_zoom as i64)
        .bind(year)
        .bind(slot_id)
        .bind(dst_x)
        .bind(dst_y)
        .bind(observations)
        .bind(taxa_count)
        .bind(top_lat)
        .bind(left_lon)
        .bind(bottom_lat)
        .bind(right_lon)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("inserting derived tile: {e}")))?;
    }

    let marker = local_from_marker(src_zoom, src_sha);
    sqlx::query(
        r#"INSERT INTO taxon_layer_state (taxon_id, zoom, year, slot_id, last_fetch_utc, payload_sha256, grid_cell_count)
           VALUES (?,?,?,?,?,?,?)
           ON CONFLICT(taxon_id, zoom, year, slot_id) DO UPDATE SET
             last_fetch_utc = excluded.last_fetch_utc,
             payload_sha256 = excluded.payload_sha256,
             grid_cell_count = excluded.grid_cell_count"#,
    )
    .bind(taxon_id)
    .bind(dst_zoom as i64)
    .bind(year)
    .bind(slot_id)
    .bind(&now)
    .bind(&marker)
    .bind(aggregated.len() as i64)
    .execute(&mut *tx)
    .await
    .map_err(|e| CoreError::Internal(format!("writing derived layer-state marker: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| CoreError::Internal(format!("committing parent-zoom derivation: {e}")))?;
    Ok(())
}

/// `score = coverage^alpha / (obs_total + 1)^beta`.
pub async fn rebuild_hotmap(
    pools: &DbPools,
    zoom: u32,
    year: i64,
    slot_id: i64,
    active_taxa: &[i64],
    alpha: f64,
    beta: f64,
) -> Result<(), CoreError> {
    let mut tx: Transaction<'_, Sqlite> = query_with_timeout(pools.write().begin())
        .await
        .map_err(|e| e.into_core_error("starting rebuild_hotmap transaction"))?;

    sqlx::query("DELETE FROM grid_hotmap WHERE zoom = ? AND year = ? AND slot_id = ?")
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("clearing grid_hotmap: {e}")))?;

    sqlx::query("DELETE FROM hotmap_taxa_set WHERE zoom = ? AND year = ? AND slot_id = ?")
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("clearing hotmap_taxa_set: {e}")))?;

    for taxon_id in active_taxa {
        sqlx::query(
            "INSERT INTO hotmap_taxa_set (zoom, year, slot_id, taxon_id) VALUES (?,?,?,?)",
        )
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .bind(taxon_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("inserting hotmap_taxa_set row: {e}")))?;
    }

    if active_taxa.is_empty() {
        tx.commit()
            .await
            .map_err(|e| CoreError::Internal(format!("committing empty rebuild_hotmap: {e}")))?;
        return Ok(());
    }

    let placeholders = std::iter::repeat("?").take(active_taxa.len()).collect::<Vec<_>>().join(",");
    let query_sql = format!(
        r#"SELECT x, y_tile,
               COUNT(DISTINCT taxon_id) AS coverage,
               SUM(observations_count) AS obs_total,
               MAX(bbox_top_lat) AS top_lat,
               MIN(bbox_left_lon) AS left_lon,
               MIN(bbox_bottom_lat) AS bottom_lat,
               MAX(bbox_right_lon) AS right_lon
           FROM taxon_grid
           WHERE zoom = ? AND year = ? AND slot_id = ?
             AND taxon_id IN ({placeholders})
             AND observations_count > 0
           GROUP BY x, y_tile"#
    );

    let mut select = sqlx::query(&query_sql)
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id);
    for taxon_id in active_taxa {
        select = select.bind(taxon_id);
    }

    let rows = select
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("aggregating hotmap rows: {e}")))?;

    let now = now_iso();
    for row in rows {
        let x: i64 = row.get(0);
        let y_tile: i64 = row.get(1);
        let coverage: i64 = row.get(2);
        let obs_total: i64 = row.get(3);
        let top_lat: f64 = row.get(4);
        let left_lon: f64 = row.get(5);
        let bottom_lat: f64 = row.get(6);
        let right_lon: f64 = row.get(7);

        let score = (coverage as f64).powf(alpha) / ((obs_total as f64 + 1.0).powf(beta));

        sqlx::query(
            r#"INSERT INTO grid_hotmap (
                zoom, year, slot_id, x, y_tile, coverage, score, obs_total,
                bbox_top_lat, bbox_left_lon, bbox_bottom_lat, bbox_right_lon, updated_at_utc
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(zoom as i64)
        .bind(year)
        .bind(slot_id)
        .bind(x)
        .bind(y_tile)
        .bind(coverage)
        .bind(score)
        .bind(obs_total)
        .bind(top_lat)
        .bind(left_lon)
        .bind(bottom_lat)
        .bind(right_lon)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("inserting grid_hotmap row: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| CoreError::Internal(format!("committing rebuild_hotmap: {e}")))?;
    Ok(())
}

pub async fn clear_hotmap(
    pools: &DbPools,
    zoom: Option<u32>,
    year: Option<i64>,
    slot_id: Option<i64>,
) -> Result<(), CoreError> {
    let mut sql = String::from("DELETE FROM grid_hotmap WHERE 1=1");
    if zoom.is_some() {
        sql.push_str(" AND zoom = ?");
    }
    if year.is_some() {
        sql.push_str(" AND year = ?");
    }
    if slot_id.is_some() {
        sql.push_str(" AND slot_id = ?");
    }
    let mut query = sqlx::query(&sql);
    if let Some(z) = zoom {
        query = query.bind(z as i64);
    }
    if let Some(y) = year {
        query = query.bind(y);
    }
    if let Some(s) = slot_id {
        query = query.bind(s);
    }
    query_with_timeout(query.execute(pools.write()))
        .await
        .map_err(|e| e.into_core_error("clearing hotmap"))?;
    Ok(())
}

/// Deletes derived (`LOCAL_FROM_`-marked) layers whose zoom differs from
/// `keep_zoom`, discarding stale derived-zoom cache entries.
pub async fn clear_derived_zoom_cache(
    pools: &DbPools,
    keep_zoom: u32,
    year: Option<i64>,
    slot_id: Option<i64>,
) -> Result<(), CoreError> {
    let mut tx: Transaction<'_, Sqlite> = query_with_timeout(pools.write().begin())
        .await
        .map_err(|e| e.into_core_error("starting clear_derived_zoom_cache transaction"))?;

    let mut select_sql = String::from(
        "SELECT taxon_id, zoom, year, slot_id FROM taxon_layer_state
         WHERE payload_sha256 LIKE 'LOCAL_FROM_%' AND zoom != ?",
    );
    if year.is_some() {
        select_sql.push_str(" AND year = ?");
    }
    if slot_id.is_some() {
        select_sql.push_str(" AND slot_id = ?");
    }

    let mut select = sqlx::query(&select_sql).bind(keep_zoom as i64);
    if let Some(y) = year {
        select = select.bind(y);
    }
    if let Some(s) = slot_id {
        select = select.bind(s);
    }

    let stale_layers = select
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("selecting stale derived layers: {e}")))?;

    for layer in stale_layers {
        let taxon_id: i64 = layer.get(0);
        let zoom: i64 = layer.get(1);
        let layer_year: i64 = layer.get(2);
        let layer_slot: i64 = layer.get(3);

        sqlx::query(
            "DELETE FROM taxon_grid WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
        )
        .bind(taxon_id)
        .bind(zoom)
        .bind(layer_year)
        .bind(layer_slot)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("clearing stale taxon_grid rows: {e}")))?;

        sqlx::query(
            "DELETE FROM taxon_layer_state WHERE taxon_id = ? AND zoom = ? AND year = ? AND slot_id = ?",
        )
        .bind(taxon_id)
        .bind(zoom)
        .bind(layer_year)
        .bind(layer_slot)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("clearing stale layer-state row: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| CoreError::Internal(format!("committing clear_derived_zoom_cache: {e}")))?;
    Ok(())
}

pub async fn upsert_taxon_dim(
    pools: &DbPools,
    taxon_id: i64,
    scientific_name: Option<&str>,
    swedish_name: Option<&str>,
) -> Result<(), CoreError> {
    let now = now_iso();
    query_with_timeout(
        sqlx::query(
            r#"INSERT INTO taxon_dim (taxon_id, scientific_name, swedish_name, updated_at_utc)
               VALUES (?,?,?,?)
               ON CONFLICT(taxon_id) DO UPDATE SET
                 scientific_name = excluded.scientific_name,
                 swedish_name = excluded.swedish_name,
                 updated_at_utc = excluded.updated_at_utc"#,
        )
        .bind(taxon_id)
        .bind(scientific_name)
        .bind(swedish_name)
        .bind(&now)
        .execute(pools.write()),
    )
    .await
    .map_err(|e| e.into_core_error("upserting taxon_dim"))?;
    Ok(())
}

/// Reads hotmap tiles for `zoom` across `years` and `slot_ids`. When more
/// than one `(year, slot)` bucket is selected, aggregates with
/// `MAX(coverage), MAX(score)` per `(x, y_tile)` rather than summing, since
/// each row is already a per-bucket aggregate.
pub async fn query_hotmap(
    pools: &DbPools,
    zoom: u32,
    years: &[i64],
    slot_ids: &[i64],
) -> Result<Vec<HotmapTile>, CoreError> {
    if years.is_empty() || slot_ids.is_empty() {
        return Ok(Vec::new());
    }

    let year_placeholders = std::iter::repeat("?").take(years.len()).collect::<Vec<_>>().join(",");
    let slot_placeholders = std::iter::repeat("?").take(slot_ids.len()).collect::<Vec<_>>().join(",");

    let sql = format!(
        r#"SELECT x, y_tile,
               MAX(coverage) AS coverage,
               MAX(score) AS score,
               SUM(obs_total) AS obs_total,
               MAX(bbox_top_lat) AS top_lat,
               MIN(bbox_left_lon) AS left_lon,
               MIN(bbox_bottom_lat) AS bottom_lat,
               MAX(bbox_right_lon) AS right_lon
           FROM grid_hotmap
           WHERE zoom = ? AND year IN ({year_placeholders}) AND slot_id IN ({slot_placeholders})
           GROUP BY x, y_tile
           ORDER BY coverage DESC, score DESC"#
    );

    let mut query = sqlx::query(&sql).bind(zoom as i64);
    for year in years {
        query = query.bind(year);
    }
    for slot in slot_ids {
        query = query.bind(slot);
    }

    let rows = query_with_timeout(query.fetch_all(pools.read()))
        .await
        .map_err(|e| e.into_core_error("querying hotmap"))?;

    Ok(rows
        .into_iter()
        .map(|row| HotmapTile {
            zoom: zoom as i64,
            x: row.get(0),
            y_tile: row.get(1),
            coverage: row.get(2),
            score: row.get(3),
            obs_total: row.get::<i64, _>(4),
            bbox: (row.get(5), row.get(6), row.get(7), row.get(8)),
        })
        .collect())
}

/// Per-cell taxa enumeration restricted to the active set for `(zoom,
/// years, slot_ids)`. Aggregates `observations_count` with `SUM` across the
/// selected buckets.
pub async fn query_cell_taxa(
    pools: &DbPools,
    zoom: u32,
    years: &[i64],
    slot_ids: &[i64],
    x: i64,
    y_tile: i64,
    limit: i64,
) -> Result<Vec<CellTaxon>, CoreError> {
    if years.is_empty() || slot_ids.is_empty() {
        return Ok(Vec::new());
    }

    let year_placeholders = std::iter::repeat("?").take(years.len()).collect::<Vec<_>>().join(",");
    let slot_placeholders = std::iter::repeat("?").take(slot_ids.len()).collect::<Vec<_>>().join(",");

    // The active-set check is a semi-join (`IN (SELECT ...)`), not a join:
    // a plain `INNER JOIN hotmap_taxa_set` on `(zoom, year IN ..., slot_id
    // IN ..., taxon_id)` would match once per `(year, slot)` bucket a taxon
    // is active in, fanning out `taxon_grid` rows before the `SUM` and
    // inflating `observations_count` by the number of matching buckets.
    let sql = format!(
        r#"SELECT tg.taxon_id, td.scientific_name, td.swedish_name, SUM(tg.observations_count) AS observations_count
           FROM taxon_grid tg
           LEFT JOIN taxon_dim td ON td.taxon_id = tg.taxon_id
           WHERE tg.zoom = ? AND tg.year IN ({year_placeholders}) AND tg.slot_id IN ({slot_placeholders})
             AND tg.x = ? AND tg.y_tile = ? AND tg.observations_count > 0
             AND tg.taxon_id IN (
               SELECT taxon_id FROM hotmap_taxa_set
               WHERE zoom = ? AND year IN ({year_placeholders}) AND slot_id IN ({slot_placeholders})
             )
           GROUP BY tg.taxon_id, td.scientific_name, td.swedish_name
           ORDER BY observations_count DESC
           LIMIT ?"#
    );

    let mut query = sqlx::query(&sql).bind(zoom as i64);
    for year in years {
        query = query.bind(year);
    }
    for slot in slot_ids {
        query = query.bind(slot);
    }
    query = query.bind(x).bind(y_tile).bind(zoom as i64);
    for year in years {
        query = query.bind(year);
    }
    for slot in slot_ids {
        query = query.bind(slot);
    }
    query = query.bind(limit);

    let rows = query_with_timeout(query.fetch_all(pools.read()))
        .await
        .map_err(|e| e.into_core_error("querying cell taxa"))?;

    Ok(rows
        .into_iter()
        .map(|row| CellTaxon {
            taxon_id: row.get(0),
            scientific_name: row.get(1),
            swedish_name: row.get(2),
            observations_count: row.get(3),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_pool;

    async fn test_pools() -> DbPools {
        let pools = init_pool("sqlite::memory:").await.expect("in-memory pool");
        sqlx::migrate!("./migrations")
            .run(pools.write())
            .await
            .expect("migrations apply");
        pools
    }

    fn cell(x: i64, y: i64, obs: i64, taxa: i64) -> GridCell {
        use crate::model::{CellBoundingBox, LatLon};
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

    #[tokio::test]
    async fn layer_state_roundtrips() {
        let pools = test_pools().await;
        assert!(get_layer_state(&pools, 42, 15, 0, 0).await.unwrap().is_none());

        upsert_layer_state(&pools, 42, 15, 0, 0, "deadbeef", 3).await.unwrap();
        let state = get_layer_state(&pools, 42, 15, 0, 0).await.unwrap().unwrap();
        assert_eq!(state.payload_sha256, "deadbeef");
        assert_eq!(state.grid_cell_count, 3);
    }

    #[tokio::test]
    async fn replace_taxon_grid_is_idempotent_on_rerun() {
        let pools = test_pools().await;
        let cells = vec![cell(17000, 9500, 10, 1)];
        replace_taxon_grid(&pools, 42, 15, 0, 0, &cells).await.unwrap();
        replace_taxon_grid(&pools, 42, 15, 0, 0, &cells).await.unwrap();

        let rows = sqlx::query("SELECT COUNT(*) FROM taxon_grid WHERE taxon_id = 42")
            .fetch_one(pools.read())
            .await
            .unwrap();
        let count: i64 = rows.get(0);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn materialize_parent_zoom_sums_observations_and_maxes_taxa() {
        let pools = test_pools().await;
        let cells = vec![cell(34000, 19000, 10, 1), cell(34001, 19000, 5, 2)];
        replace_taxon_grid(&pools, 42, 15, 0, 0, &cells).await.unwrap();

        materialize_parent_zoom_from_child(&pools, 42, 0, 0, 15, 14, "src-sha")
            .await
            .unwrap();

        let row = sqlx::query(
            "SELECT x, y_tile, observations_count, taxa_count FROM taxon_grid WHERE taxon_id = 42 AND zoom = 14",
        )
        .fetch_one(pools.read())
        .await
        .unwrap();
        let x: i64 = row.get(0);
        let y: i64 = row.get(1);
        let obs: i64 = row.get(2);
        let taxa: i64 = row.get(3);
        assert_eq!((x, y, obs, taxa), (17000, 9500, 15, 2));

        let state = get_layer_state(&pools, 42, 14, 0, 0).await.unwrap().unwrap();
        assert_eq!(state.payload_sha256, "LOCAL_FROM_15:src-sha");
    }

    #[tokio::test]
    async fn rebuild_hotmap_scores_per_scenario_one() {
        let pools = test_pools().await;
        for (taxon_id, obs) in [(1, 10), (2, 20), (3, 30)] {
            let cells = vec![cell(17000, 9500, obs, 1)];
            replace_taxon_grid(&pools, taxon_id, 15, 0, 0, &cells).await.unwrap();
        }

        rebuild_hotmap(&pools, 15, 0, 0, &[1, 2, 3], 2.0, 0.5).await.unwrap();

        let row = sqlx::query("SELECT coverage, score FROM grid_hotmap WHERE zoom = 15")
            .fetch_one(pools.read())
            .await
            .unwrap();
        let coverage: i64 = row.get(0);
        let score: f64 = row.get(1);
        assert_eq!(coverage, 3);
        assert!((score - (9.0 / 61.0_f64.sqrt())).abs() < 1e-9);
    }

    #[tokio::test]
    async fn query_hotmap_aggregates_slot_window_with_max() {
        let pools = test_pools().await;
        for (slot, coverage_taxa) in [(20, vec![1]), (21, vec![1, 2]), (22, vec![1])] {
            for taxon_id in &coverage_taxa {
                let cells = vec![cell(17000, 9500, 10, 1)];
                replace_taxon_grid(&pools, *taxon_id, 15, 2024, slot, &cells).await.unwrap();
            }
            rebuild_hotmap(&pools, 15, 2024, slot, &coverage_taxa, 2.0, 0.5).await.unwrap();
        }

        let tiles = query_hotmap(&pools, 15, &[2024], &[20, 21, 22]).await.unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].coverage, 2);
    }
}
