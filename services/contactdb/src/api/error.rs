//! API error type and constructors.
//!
//! # Purpose and responsibility
//! Maps engine and storage failures onto HTTP status codes and the `{"reason": ...}` body
//! clients of the contact database expect.
//!
//! # Key invariants and assumptions
//! - Commit failures and storage errors never expose internal detail; it is logged instead.
//! - Schema violations are returned in full, one entry per offending path.
use crate::api::types::ErrorResponse;
use crate::engine::error::{BatchError, EngineError, FieldViolation};
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # What it does
/// Couples an HTTP status code with a JSON error body and implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, reason: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            reason: reason.to_string(),
            violations: Vec::new(),
        },
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(reason: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, reason)
}

/// Build a 400 Bad Request error.
pub fn api_bad_request(reason: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, reason)
}

/// Build a 400 error listing every schema violation.
pub fn api_validation_error(violations: Vec<FieldViolation>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorResponse {
            reason: "Aggregate failed schema validation.".to_string(),
            violations,
        },
    }
}

/// Build a 500 Internal Server Error from a store error.
///
/// # What it does
/// Logs the store error and returns the caller's generic message.
pub fn api_internal(reason: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "contactdb storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, reason)
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::BadRequest(reason) => api_bad_request(&reason),
            BatchError::Validation(violations) => api_validation_error(violations),
            BatchError::CommitFailed => api_bad_request(&BatchError::CommitFailed.to_string()),
        }
    }
}

// Read-path failures; business-rule errors cannot occur there.
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(violations) => api_validation_error(violations),
            EngineError::Commit(commit) => api_bad_request(&commit.to_string()),
            EngineError::Store(store) => api_internal("storage unavailable", &store),
        }
    }
}
