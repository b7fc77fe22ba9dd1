//! Mapping of kernel errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use taxo_kernel::error::TaxonomyError;

/// Error type returned by every handler.
#[derive(Debug)]
pub enum AppError {
    Taxonomy(TaxonomyError),
    BadRequest(String),
}

impl From<TaxonomyError> for AppError {
    fn from(e: TaxonomyError) -> Self {
        Self::Taxonomy(e)
    }
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        let AppError::Taxonomy(e) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match e {
            TaxonomyError::NotFound(_) => StatusCode::NOT_FOUND,
            TaxonomyError::DagIntegrity(_)
            | TaxonomyError::ConcurrentActivation
            | TaxonomyError::RollbackAlreadyInProgress
            | TaxonomyError::StaleEpoch { .. }
            | TaxonomyError::PruneRefused { .. }
            | TaxonomyError::VersionSpaceExhausted(_) => StatusCode::CONFLICT,
            TaxonomyError::Malformed(_) => StatusCode::BAD_REQUEST,
            TaxonomyError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TaxonomyError::RollbackFailed { .. }
            | TaxonomyError::Store(_)
            | TaxonomyError::Config(_)
            | TaxonomyError::StateMachine(_)
            | TaxonomyError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Taxonomy(e) => {
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                match e.validation() {
                    Some(validation) => json!({ "error": e.to_string(), "validation": validation }),
                    None => json!({ "error": e.to_string(), "retryable": e.is_retryable() }),
                }
            }
            AppError::BadRequest(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
