//! GET /health

use axum::extract::Extension;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use taxo_kernel::engine::TaxonomyEngine;

pub async fn health(Extension(engine): Extension<Arc<TaxonomyEngine>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": taxo_kernel::VERSION,
        "active_version": engine.active_version(),
        "rollback_phase": engine.rollback_phase(),
        "in_flight_migrations": engine.migrations().in_flight(),
    }))
}
