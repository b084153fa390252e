use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hotgrid::build_gate::BuildGate;
use hotgrid::config::Config;
use hotgrid::db;
use hotgrid::upstream::{log_client_ready, UpstreamClient, UpstreamConfig};
use hotgrid::{create_test_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hotgrid=debug".parse()?))
        .init();

    info!("Starting hotgrid");

    let config = Config::parse();

    let pools = db::init_pool(&config.database_url()).await?;
    db::run_migrations(&pools).await?;

    let upstream_config = UpstreamConfig::new(
        config.base_url.clone(),
        config.subscription_key.clone(),
        config.authorization.clone(),
    );
    log_client_ready(&upstream_config);
    let upstream = UpstreamClient::new(upstream_config);

    let state = AppState {
        pools,
        upstream,
        build_gate: BuildGate::new(),
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_test_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
