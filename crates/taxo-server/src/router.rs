//! Router construction for the taxonomy server.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use taxo_kernel::engine::TaxonomyEngine;

use crate::handlers;

/// Build the full axum router over a shared engine.
pub fn build_router(engine: Arc<TaxonomyEngine>) -> Router {
    let taxonomy = Router::new()
        .route("/versions", get(handlers::taxonomy::list_versions))
        .route("/tree", get(handlers::taxonomy::active_tree))
        .route("/diff", get(handlers::taxonomy::diff))
        .route("/migrate", post(handlers::taxonomy::migrate))
        .route("/migrate/preview", post(handlers::taxonomy::preview))
        .route("/rollback", post(handlers::rollback::rollback))
        .route(
            "/:version/tree",
            get(handlers::taxonomy::version_tree).delete(handlers::taxonomy::prune),
        )
        .route("/:version/activate", post(handlers::taxonomy::activate));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/taxonomy", taxonomy)
        .layer(Extension(engine))
}
