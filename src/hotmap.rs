//! Hotmap builder: combines per-taxon grids into per-tile coverage
//! and score for an active taxa set.
//!
//! The aggregation SQL and scoring formula live in [`crate::storage`];
//! this module is the thin entry point the pipeline calls once
//! per `(zoom, year, slot)` key, and the place to tune `alpha`/`beta`
//! without touching the storage layer's transaction plumbing.

use crate::db::DbPools;
use crate::error::CoreError;

pub const DEFAULT_ALPHA: f64 = 2.0;
pub const DEFAULT_BETA: f64 = 0.5;

pub async fn rebuild(
    pools: &DbPools,
    zoom: u32,
    year: i64,
    slot_id: i64,
    active_taxa: &[i64],
    alpha: f64,
    beta: f64,
) -> Result<(), CoreError> {
    crate::storage::rebuild_hotmap(pools, zoom, year, slot_id, active_taxa, alpha, beta).await
}
