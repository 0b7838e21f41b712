//! Contact database HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, installs the trace layer and defines the state shared by handlers.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::engine::Engine;
use crate::observability;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

pub const API_PREFIX: &str = "/api/contactdb";

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

async fn openapi_document() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                remote_user = request
                    .headers()
                    .get(api::commit::REMOTE_USER_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or(api::commit::ANONYMOUS)
            );
            span.set_parent(observability::trace_context_from_headers(request.headers()));
            span
        });

    let routes = Router::new()
        .route("/ping", get(api::system::ping))
        .route("/health", get(api::system::health))
        .route("/org/manual/:id", get(api::orgs::get_organisation))
        .route("/org/auto/:id", get(api::orgs::get_automatic_organisation))
        .route("/asn/manual/:number", get(api::orgs::get_asn))
        .route("/org/manual/commit", post(api::commit::commit))
        .route("/openapi.json", get(openapi_document));

    Router::new()
        .nest(API_PREFIX, routes)
        .layer(trace_layer)
        .with_state(state)
}
