//! Operator endpoints. Every route needs a bearer token with the `admin` role.

use super::{auth::RevokedCount, parse_principal_id, require_admin};
use crate::{
    api::{error::ErrorBody, AppState},
    error::AuthError,
    principal::PrincipalStatus,
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenVersion {
    pub token_version: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StatusRequest {
    pub status: PrincipalStatus,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RotatedKey {
    pub kid: String,
}

#[utoipa::path(
    post,
    path= "/v1/admin/principals/{id}/revoke-tokens",
    params(("id" = String, Path, description = "Principal id")),
    responses (
        (status = 200, description = "Revocation counter bumped", body = TokenVersion),
        (status = 400, description = "Unknown principal", body = ErrorBody),
        (status = 401, description = "Caller is not an admin", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "admin"
)]
pub async fn revoke_tokens(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TokenVersion>, AuthError> {
    let admin = require_admin(&headers, &state).await?;
    let principal_id = parse_principal_id(&id)?;
    let token_version = state.service.force_global_revoke(principal_id).await?;
    info!(admin = %admin.sub, principal_id = %principal_id, "admin revoked access tokens");
    Ok(Json(TokenVersion { token_version }))
}

#[utoipa::path(
    post,
    path= "/v1/admin/principals/{id}/logout-all",
    operation_id = "admin_logout_all",
    params(("id" = String, Path, description = "Principal id")),
    responses (
        (status = 200, description = "Every session of the principal revoked", body = RevokedCount),
        (status = 401, description = "Caller is not an admin", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "admin"
)]
pub async fn logout_all(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RevokedCount>, AuthError> {
    let admin = require_admin(&headers, &state).await?;
    let principal_id = parse_principal_id(&id)?;
    let revoked = state.service.logout_all(principal_id).await?;
    info!(admin = %admin.sub, principal_id = %principal_id, revoked, "admin revoked sessions");
    Ok(Json(RevokedCount { revoked }))
}

#[utoipa::path(
    put,
    path= "/v1/admin/principals/{id}/status",
    params(("id" = String, Path, description = "Principal id")),
    request_body = StatusRequest,
    responses (
        (status = 204, description = "Status changed; non-active status also revokes every session"),
        (status = 400, description = "Unknown principal, or its status can no longer change", body = ErrorBody),
        (status = 401, description = "Caller is not an admin", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "admin"
)]
pub async fn set_status(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Option<Json<StatusRequest>>,
) -> Result<StatusCode, AuthError> {
    let admin = require_admin(&headers, &state).await?;
    let principal_id = parse_principal_id(&id)?;
    let Json(request) =
        payload.ok_or_else(|| AuthError::InvalidInput("missing payload".to_string()))?;
    state.service.set_status(principal_id, request.status).await?;
    info!(
        admin = %admin.sub,
        principal_id = %principal_id,
        status = request.status.as_str(),
        "admin changed principal status"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path= "/v1/admin/keys/rotate",
    responses (
        (status = 200, description = "New active signing key", body = RotatedKey),
        (status = 401, description = "Caller is not an admin", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "admin"
)]
pub async fn rotate_keys(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<RotatedKey>, AuthError> {
    let admin = require_admin(&headers, &state).await?;
    let kid = state.service.issuer().keys().rotate().await?;
    info!(admin = %admin.sub, kid = kid.as_str(), "admin rotated signing key");
    Ok(Json(RotatedKey { kid }))
}
