//! Batch commit handler.
//!
//! # Key invariants and assumptions
//! - The acting user is taken from `X-Remote-User`, which the fronting web server sets after
//!   authenticating the request. It is recorded in audit entries and never used for
//!   authorization.
use crate::api::error::ApiError;
use crate::api::types::{CommitRequest, CommitResult, ErrorResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::Value;

pub const REMOTE_USER_HEADER: &str = "x-remote-user";
pub const ANONYMOUS: &str = "anonymous";

fn remote_user(headers: &HeaderMap) -> &str {
    headers
        .get(REMOTE_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .unwrap_or(ANONYMOUS)
}

#[utoipa::path(
    post,
    path = "/api/contactdb/org/manual/commit",
    tag = "organisations",
    request_body = CommitRequest,
    responses(
        (status = 200, description = "All commands applied", body = Vec<CommitResult>),
        (status = 400, description = "Malformed batch, schema violation or commit failure", body = ErrorResponse)
    )
)]
/// Apply a batch of create/update/delete commands atomically.
///
/// # Errors
/// - 400 with a `reason` for malformed batches and failed commits; nothing is persisted.
/// - 400 with `violations` when an aggregate fails schema validation.
pub(crate) async fn commit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Vec<CommitResult>>, ApiError> {
    let user = remote_user(&headers);
    tracing::info!(user, "got commit request");
    let results = state.engine.apply_batch(user, &body).await?;
    Ok(Json(
        results
            .into_iter()
            .map(|(kind, id)| CommitResult(kind, id))
            .collect(),
    ))
}
