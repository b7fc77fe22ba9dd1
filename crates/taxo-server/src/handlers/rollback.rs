//! POST /taxonomy/rollback

use super::actor;
use crate::error::AppError;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::error::RollbackFailure;
use taxo_kernel::rollback::RollbackOutcome;
use taxo_kernel::VersionId;

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub target_version: VersionId,
}

/// 200 on success, 404 for an unknown target, 504 past the deadline.
/// A failed outcome still carries its full body.
pub async fn rollback(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    headers: HeaderMap,
    Json(request): Json<RollbackRequest>,
) -> Result<(StatusCode, Json<RollbackOutcome>), AppError> {
    let outcome = engine
        .rollback(request.target_version, actor(&headers, &engine))
        .await?;
    let status = match &outcome.failure {
        None => StatusCode::OK,
        Some(RollbackFailure::TargetNotFound { .. }) => StatusCode::NOT_FOUND,
        Some(RollbackFailure::DeadlineExceeded { .. }) => StatusCode::GATEWAY_TIMEOUT,
        Some(RollbackFailure::Activation { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)))
}
