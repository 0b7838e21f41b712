//! Liveness and health handlers.
//!
//! # Key invariants and assumptions
//! - `/ping` never touches storage.
//! - `/health` opens and releases one storage round trip.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/api/contactdb/ping",
    tag = "system",
    responses((status = 200, description = "Always `[\"pong\"]`", body = Vec<String>))
)]
pub(crate) async fn ping() -> Json<Vec<&'static str>> {
    Json(vec!["pong"])
}

#[utoipa::path(
    get,
    path = "/api/contactdb/health",
    tag = "system",
    responses(
        (status = 200, description = "Storage reachable", body = HealthStatus),
        (status = 500, description = "Storage unavailable", body = crate::api::types::ErrorResponse)
    )
)]
/// Probe the storage backend.
///
/// # Errors
/// - Returns 500 if the storage health check fails.
pub(crate) async fn health(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    let store = state.engine.store();
    store
        .health_check()
        .await
        .map_err(|err| api_internal("storage unavailable", &err))?;
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        backend: store.backend_name().to_string(),
        durable: store.is_durable(),
    }))
}
