//! Read handlers for manual and imported organisations and for autonomous system numbers.
use crate::api::error::{ApiError, api_not_found};
use crate::app::AppState;
use crate::model::{AsnDetails, Organisation};
use axum::Json;
use axum::extract::{Path, State};

#[utoipa::path(
    get,
    path = "/api/contactdb/org/manual/{id}",
    tag = "organisations",
    params(("id" = i64, Path, description = "Organisation id")),
    responses(
        (status = 200, description = "Full organisation aggregate", body = Organisation),
        (status = 404, description = "No such organisation", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_organisation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Organisation>, ApiError> {
    state
        .engine
        .organisation(id)
        .await?
        .map(Json)
        .ok_or_else(|| api_not_found("Organisation not found"))
}

#[utoipa::path(
    get,
    path = "/api/contactdb/org/auto/{id}",
    tag = "organisations",
    params(("id" = i64, Path, description = "Imported organisation id")),
    responses(
        (status = 200, description = "Imported organisation, without annotations", body = Organisation),
        (status = 404, description = "No such imported organisation", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_automatic_organisation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Organisation>, ApiError> {
    state
        .engine
        .automatic_organisation(id)
        .await?
        .map(Json)
        .ok_or_else(|| api_not_found("Organisation not found"))
}

#[utoipa::path(
    get,
    path = "/api/contactdb/asn/manual/{number}",
    tag = "organisations",
    params(("number" = i64, Path, description = "Autonomous system number")),
    responses(
        (status = 200, description = "Linking organisations and annotations", body = AsnDetails),
        (status = 404, description = "No organisation links this number", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_asn(
    State(state): State<AppState>,
    Path(number): Path<i64>,
) -> Result<Json<AsnDetails>, ApiError> {
    state
        .engine
        .asn(number)
        .await?
        .map(Json)
        .ok_or_else(|| api_not_found("ASN not found"))
}
