//! Ingest pipeline (C7): for each taxon and calendar slot, fetches the
//! base-zoom grid, skips unchanged layers by content hash, derives
//! coarser zooms, and rebuilds the hotmap for every affected
//! `(zoom, year)` key (§4.7).

use std::time::Duration;

use tracing::info;

use crate::db::DbPools;
use crate::error::CoreError;
use crate::hash::stable_gridcells_hash;
use crate::hotmap;
use crate::model::{merge_grid_cells, GridCell};
use crate::storage;
use crate::taxa_list::TaxonEntry;
use crate::tiles::{BBox, TileCoord};
use crate::timeslot::date_window;
use crate::upstream::{DateFilter, UpstreamClient};

/// Between per-taxon upstream calls, even when everything is healthy
/// (§4.7 throttling).
const INTER_TAXON_PACING: Duration = Duration::from_secs(2);

/// Whole-world bbox at the configured base zoom: every request seeds from
/// this and recursively splits on "too many cells" (§4.5).
const WORLD_BBOX: BBox = (85.05112878, -180.0, -85.05112878, 180.0);

const MAX_SPLIT_DEPTH: u32 = 6;

pub struct BuildRequest {
    pub slot_ids: Vec<i64>,
    /// Sorted descending; `zooms[0]` is the base (finest) zoom fetched
    /// from upstream, the rest are derived by parent aggregation.
    pub zooms: Vec<u32>,
    pub taxa: Vec<TaxonEntry>,
    pub year_from: i64,
    pub year_to: i64,
    pub alpha: f64,
    pub beta: f64,
    pub force: bool,
}

pub struct BuildReport {
    pub slots_built: usize,
    pub zooms: Vec<u32>,
    pub base_zoom: u32,
    pub n_taxa: usize,
}

/// Runs the full ingest pipeline. The caller is responsible for holding
/// the process-wide `BuildGate` guard for the duration of this call.
pub async fn run_build(
    pools: &DbPools,
    upstream: &UpstreamClient,
    request: &BuildRequest,
) -> Result<BuildReport, CoreError> {
    let base_zoom = *request.zooms.iter().max().ok_or_else(|| {
        CoreError::BadRequest("at least one zoom level is required".to_string())
    })?;
    let derived_zooms: Vec<u32> = request.zooms.iter().copied().filter(|&z| z != base_zoom).collect();

    for &slot_id in &request.slot_ids {
        for entry in &request.taxa {
            tokio::time::sleep(INTER_TAXON_PACING).await;

            let mut per_year_cells: Vec<Vec<GridCell>> = Vec::new();

            for year in request.year_from..=request.year_to {
                let (start_date, end_date) = date_window(slot_id as u32, year as i32);
                let date_filter = DateFilter { start_date, end_date };

                let cells = upstream
                    .geogrid_resilient(
                        &[entry.taxon_id],
                        base_zoom,
                        Some(&date_filter),
                        WORLD_BBOX,
                        MAX_SPLIT_DEPTH,
                    )
                    .await?;

                let sha = stable_gridcells_hash(&cells);
                let existing = storage::get_layer_state(pools, entry.taxon_id, base_zoom, year, slot_id).await?;
                let unchanged = existing.as_ref().is_some_and(|s| s.payload_sha256 == sha);

                if request.force || !unchanged {
                    storage::replace_taxon_grid(pools, entry.taxon_id, base_zoom, year, slot_id, &cells).await?;
                    storage::upsert_layer_state(pools, entry.taxon_id, base_zoom, year, slot_id, &sha, cells.len() as i64).await?;

                    for &dst_zoom in &derived_zooms {
                        storage::materialize_parent_zoom_from_child(
                            pools, entry.taxon_id, year, slot_id, base_zoom, dst_zoom, &sha,
                        )
                        .await?;
                    }
                } else {
                    info!(
                        "No change for taxon_id={} zoom={} year={} slot_id={} (sha match)",
                        entry.taxon_id, base_zoom, year, slot_id
                    );
                }

                per_year_cells.push(cells);
            }

            // All-years aggregate: merge every per-year cell list under the
            // same merge rule as a resilient-split merge (§4.7 step 2).
            let merged = merge_grid_cells(per_year_cells);
            let merged_sha = stable_gridcells_hash(&merged);
            storage::replace_taxon_grid(pools, entry.taxon_id, base_zoom, 0, slot_id, &merged).await?;
            storage::upsert_layer_state(pools, entry.taxon_id, base_zoom, 0, slot_id, &merged_sha, merged.len() as i64).await?;
            for &dst_zoom in &derived_zooms {
                storage::materialize_parent_zoom_from_child(
                    pools, entry.taxon_id, 0, slot_id, base_zoom, dst_zoom, &merged_sha,
                )
                .await?;
            }

            storage::upsert_taxon_dim(
                pools,
                entry.taxon_id,
                entry.scientific_name.as_deref(),
                entry.swedish_name.as_deref(),
            )
            .await?;
        }

        let taxon_ids: Vec<i64> = request.taxa.iter().map(|t| t.taxon_id).collect();
        let years_with_aggregate: Vec<i64> = (request.year_from..=request.year_to).chain(std::iter::once(0)).collect();
        for &year in &years_with_aggregate {
            for &zoom in &request.zooms {
                hotmap::rebuild(pools, zoom, year, slot_id, &taxon_ids, request.alpha, request.beta).await?;
            }
        }
    }

    info!(
        "Pipeline build complete: slots={:?} zooms={:?} base_zoom={} taxa={}",
        request.slot_ids, request.zooms, base_zoom, request.taxa.len()
    );

    Ok(BuildReport {
        slots_built: request.slot_ids.len(),
        zooms: request.zooms.clone(),
        base_zoom,
        n_taxa: request.taxa.len(),
    })
}

/// Re-derives every coarser zoom in `derived_zooms` for a given layer
/// without re-contacting upstream, using the currently stored base-zoom
/// hash as `src_sha` (used to rebuild after a schema/scoring change).
pub async fn rebuild_derived_zooms(
    pools: &DbPools,
    taxon_id: i64,
    base_zoom: u32,
    derived_zooms: &[u32],
    year: i64,
    slot_id: i64,
) -> Result<(), CoreError> {
    let state = storage::get_layer_state(pools, taxon_id, base_zoom, year, slot_id)
        .await?
        .ok_or_else(|| CoreError::Internal(format!(
            "no base-zoom layer state for taxon_id={taxon_id} zoom={base_zoom} year={year} slot_id={slot_id}"
        )))?;

    for &dst_zoom in derived_zooms {
        storage::materialize_parent_zoom_from_child(
            pools, taxon_id, year, slot_id, base_zoom, dst_zoom, &state.payload_sha256,
        )
        .await?;
    }
    Ok(())
}

/// Parent tile at `dst_zoom` covering a slippy tile at `src_zoom`, used
/// by callers that need to reason about which derived tile a fetched
/// cell maps to without going through storage.
pub fn parent_tile(src_zoom: u32, x: u32, y: u32, dst_zoom: u32) -> Option<TileCoord> {
    TileCoord::new(src_zoom, x, y).parent_at(dst_zoom)
}
