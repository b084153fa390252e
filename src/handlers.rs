//! Thin axum handlers. Each handler validates and shapes its query/body,
//! then delegates to the engine modules; business logic itself lives in
//! `pipeline`, `query`, and `export`.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api_constants::{DEFAULT_CELL_TAXA_LIMIT, DEFAULT_RANK_LIMIT, MAX_CELL_TAXA_LIMIT, MAX_RANK_LIMIT};
use crate::distance::DecayMode;
use crate::error::{ApiError, CoreError};
use crate::export;
use crate::hotmap;
use crate::pipeline::{self, BuildRequest};
use crate::query::{self, RankNearbyParams};
use crate::taxa_list;
use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
pub struct PipelineBuildBody {
    pub slot_id: Option<i64>,
    pub slot_ids: Option<Vec<i64>>,
    pub zooms: Vec<u32>,
    pub n: Option<usize>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    #[serde(default)]
    pub force: bool,
    pub year_from: i64,
    pub year_to: i64,
}

#[derive(Debug, Serialize)]
pub struct PipelineBuildResponse {
    pub ok: bool,
    pub slots_built: usize,
    pub zooms: Vec<u32>,
    pub base_zoom: u32,
    pub n_taxa: usize,
    pub alpha: f64,
    pub beta: f64,
    pub year_from: i64,
    pub year_to: i64,
}

pub async fn pipeline_build(
    State(app): State<AppState>,
    Json(body): Json<PipelineBuildBody>,
) -> Result<Json<PipelineBuildResponse>, ApiError> {
    let guard = app.build_gate.try_acquire().map_err(ApiError::from)?;

    let slot_ids = match (body.slot_id, body.slot_ids) {
        (Some(single), None) => vec![single],
        (None, Some(many)) => many,
        (None, None) => vec![0],
        (Some(_), Some(_)) => {
            return Err(ApiError::from(CoreError::BadRequest(
                "specify either slot_id or slot_ids, not both".to_string(),
            )))
        }
    };

    let alpha = body.alpha.unwrap_or(app.config.hotmap_alpha);
    let beta = body.beta.unwrap_or(app.config.hotmap_beta);

    let taxa = taxa_list::load_taxa_list(&app.config.lists_dir.join("taxa.csv"), body.n)
        .await
        .map_err(ApiError::from)?;

    let request = BuildRequest {
        slot_ids,
        zooms: body.zooms,
        taxa,
        year_from: body.year_from,
        year_to: body.year_to,
        alpha,
        beta,
        force: body.force,
    };

    let report = pipeline::run_build(&app.pools, &app.upstream, &request)
        .await
        .map_err(ApiError::from)?;
    drop(guard);

    Ok(Json(PipelineBuildResponse {
        ok: true,
        slots_built: report.slots_built,
        zooms: report.zooms,
        base_zoom: report.base_zoom,
        n_taxa: report.n_taxa,
        alpha,
        beta,
        year_from: request.year_from,
        year_to: request.year_to,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HotmapQuery {
    pub zoom: u32,
    pub slot_id: i64,
    #[serde(default)]
    pub year_from: i64,
    pub year_to: Option<i64>,
}

pub async fn hotmap(
    State(app): State<AppState>,
    Query(q): Query<HotmapQuery>,
) -> Result<Json<Value>, ApiError> {
    let year_to = q.year_to.unwrap_or(q.year_from);
    let tiles = query::hotmap_window(&app.pools, q.zoom, q.year_from, year_to, &[q.slot_id])
        .await
        .map_err(ApiError::from)?;
    Ok(Json(export::hotmap_to_geojson(&tiles, q.year_from, q.slot_id)))
}

#[derive(Debug, Deserialize)]
pub struct HotmapWindowQuery {
    pub zoom: u32,
    pub slot_ids: String,
    #[serde(default)]
    pub year_from: i64,
    pub year_to: Option<i64>,
}

fn parse_csv_i64(csv: &str) -> Result<Vec<i64>, ApiError> {
    csv.split(',')
        .map(|s| s.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ApiError::from(CoreError::BadRequest("slot_ids must be a comma-separated list of integers".to_string())))
}

pub async fn hotmap_window(
    State(app): State<AppState>,
    Query(q): Query<HotmapWindowQuery>,
) -> Result<Json<Value>, ApiError> {
    let slot_ids = parse_csv_i64(&q.slot_ids)?;
    let year_to = q.year_to.unwrap_or(q.year_from);
    let tiles = query::hotmap_window(&app.pools, q.zoom, q.year_from, year_to, &slot_ids)
        .await
        .map_err(ApiError::from)?;
    let representative_slot = slot_ids.first().copied().unwrap_or(0);
    Ok(Json(export::hotmap_to_geojson(&tiles, q.year_from, representative_slot)))
}

#[derive(Debug, Deserialize)]
pub struct CellTaxaQuery {
    pub zoom: u32,
    pub slot_id: i64,
    pub x: i64,
    pub y: i64,
    pub limit: Option<i64>,
    #[serde(default)]
    pub year_from: i64,
    pub year_to: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CellTaxonView {
    pub taxon_id: i64,
    pub scientific_name: Option<String>,
    pub swedish_name: Option<String>,
    pub observations_count: i64,
}

pub async fn cell_taxa(
    State(app): State<AppState>,
    Query(q): Query<CellTaxaQuery>,
) -> Result<Json<Vec<CellTaxonView>>, ApiError> {
    let year_to = q.year_to.unwrap_or(q.year_from);
    let limit = q.limit.unwrap_or(DEFAULT_CELL_TAXA_LIMIT).min(MAX_CELL_TAXA_LIMIT);
    let taxa = query::cell_taxa_window(&app.pools, q.zoom, q.year_from, year_to, &[q.slot_id], q.x, q.y, limit)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(taxa.into_iter().map(to_view).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CellTaxaWindowQuery {
    pub zoom: u32,
    pub slot_ids: String,
    pub x: i64,
    pub y: i64,
    pub limit: Option<i64>,
    #[serde(default)]
    pub year_from: i64,
    pub year_to: Option<i64>,
}

pub async fn cell_taxa_window(
    State(app): State<AppState>,
    Query(q): Query<CellTaxaWindowQuery>,
) -> Result<Json<Vec<CellTaxonView>>, ApiError> {
    let slot_ids = parse_csv_i64(&q.slot_ids)?;
    let year_to = q.year_to.unwrap_or(q.year_from);
    let limit = q.limit.unwrap_or(DEFAULT_CELL_TAXA_LIMIT).min(MAX_CELL_TAXA_LIMIT);
    let taxa = query::cell_taxa_window(&app.pools, q.zoom, q.year_from, year_to, &slot_ids, q.x, q.y, limit)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(taxa.into_iter().map(to_view).collect()))
}

fn to_view(t: crate::storage::CellTaxon) -> CellTaxonView {
    CellTaxonView {
        taxon_id: t.taxon_id,
        scientific_name: t.scientific_name,
        swedish_name: t.swedish_name,
        observations_count: t.observations_count,
    }
}

#[derive(Debug, Deserialize)]
pub struct RankNearbyQuery {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u32,
    pub slot_id: i64,
    pub max_km: f64,
    pub mode: Option<String>,
    pub d0_km: Option<f64>,
    pub gamma: Option<f64>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub year_from: i64,
    pub year_to: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RankedTileView {
    pub zoom: i64,
    pub x: i64,
    pub y: i64,
    pub coverage: i64,
    pub score: f64,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub d_km: f64,
    pub dw_score: f64,
    pub taxa: Vec<CellTaxonView>,
}

pub async fn rank_nearby(
    State(app): State<AppState>,
    Query(q): Query<RankNearbyQuery>,
) -> Result<Json<Vec<RankedTileView>>, ApiError> {
    let mode = match q.mode.as_deref() {
        Some("exp") | Some("exponential") => DecayMode::Exponential,
        _ => DecayMode::Rational,
    };
    let year_to = q.year_to.unwrap_or(q.year_from);
    let limit = q.limit.unwrap_or(DEFAULT_RANK_LIMIT).min(MAX_RANK_LIMIT);

    let params = RankNearbyParams {
        lat: q.lat,
        lon: q.lon,
        zoom: q.zoom,
        year_from: q.year_from,
        year_to,
        slot_id: q.slot_id,
        max_km: q.max_km,
        mode,
        d0_km: q.d0_km.unwrap_or(30.0),
        gamma: q.gamma.unwrap_or(2.0),
        limit,
        candidate_cap: 0,
    };

    let ranked = query::rank_nearby(&app.pools, &params).await.map_err(ApiError::from)?;

    Ok(Json(
        ranked
            .into_iter()
            .map(|r| RankedTileView {
                zoom: r.tile.zoom,
                x: r.tile.x,
                y: r.tile.y_tile,
                coverage: r.tile.coverage,
                score: r.tile.score,
                centroid_lat: r.centroid.0,
                centroid_lon: r.centroid.1,
                d_km: r.d_km,
                dw_score: r.dw_score,
                taxa: r.taxa.into_iter().map(to_view).collect(),
            })
            .collect(),
    ))
}

/// Rebuilds the hotmap for a single key without re-running ingest;
/// exposed for operator tooling, not part of the public route table.
pub async fn rebuild_hotmap_only(
    app: &AppState,
    zoom: u32,
    year: i64,
    slot_id: i64,
    active_taxa: &[i64],
) -> Result<(), CoreError> {
    hotmap::rebuild(&app.pools, zoom, year, slot_id, active_taxa, app.config.hotmap_alpha, app.config.hotmap_beta).await
}
