//! taxo-server: standalone REST server for the taxonomy kernel.
//!
//! Reads config from env vars:
//!   TAXO_CONFIG     path to a TOML engine config (default: in-memory storage)
//!   TAXO_BIND_ADDR  listen address (default: 0.0.0.0:4200)
//!   TAXO_LOG_JSON   set to emit JSON logs

use anyhow::Context;
use std::sync::Arc;
use taxo_kernel::config::EngineConfig;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::telemetry::init_tracing;
use taxo_server::build_router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(std::env::var_os("TAXO_LOG_JSON").is_some())?;

    let config = match std::env::var("TAXO_CONFIG") {
        Ok(path) => EngineConfig::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => EngineConfig::default(),
    };
    let bind_addr = std::env::var("TAXO_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4200".into());

    let engine = Arc::new(TaxonomyEngine::from_config(config).await?);
    tracing::info!(active = %engine.active_version(), "taxonomy engine opened");

    let app = build_router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("taxo-server listening on {bind_addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
