pub mod health;
pub mod rollback;
pub mod taxonomy;

use crate::error::AppError;
use axum::http::HeaderMap;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::{Actor, VersionId};

/// Header naming the caller recorded in the audit trail.
pub const ACTOR_HEADER: &str = "x-actor";

pub(crate) fn actor(headers: &HeaderMap, engine: &TaxonomyEngine) -> Actor {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| engine.default_actor(), Actor::new)
}

pub(crate) fn parse_version(raw: &str) -> Result<VersionId, AppError> {
    raw.parse()
        .map_err(|e| AppError::BadRequest(format!("bad version '{raw}': {e}")))
}
