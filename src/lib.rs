pub mod api_constants;
pub mod build_gate;
pub mod config;
pub mod db;
pub mod distance;
pub mod error;
pub mod export;
pub mod handlers;
pub mod hash;
pub mod hotmap;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod taxa_list;
pub mod tiles;
pub mod timeslot;
pub mod upstream;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::build_gate::BuildGate;
use crate::config::Config;
use crate::db::DbPools;
use crate::upstream::UpstreamClient;

/// Shared application state threaded through every handler via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pools: DbPools,
    pub upstream: Arc<UpstreamClient>,
    pub build_gate: BuildGate,
    pub config: Arc<Config>,
}

/// Builds the router without production middleware (CORS, tracing,
/// timeouts), for use in tests and benchmarks.
pub fn create_test_router(state: AppState) -> Router {
    Router::new()
        .route(api_constants::HEALTH_ROUTE, get(handlers::health_check))
        .route(api_constants::PIPELINE_BUILD_ROUTE, post(handlers::pipeline_build))
        .route(api_constants::HOTMAP_ROUTE, get(handlers::hotmap))
        .route(api_constants::HOTMAP_WINDOW_ROUTE, get(handlers::hotmap_window))
        .route(api_constants::CELL_TAXA_ROUTE, get(handlers::cell_taxa))
        .route(api_constants::CELL_TAXA_WINDOW_ROUTE, get(handlers::cell_taxa_window))
        .route(api_constants::RANK_NEARBY_ROUTE, get(handlers::rank_nearby))
        .with_state(state)
}
