//! Self-service session endpoints.
//!
//! Flow Overview:
//! 1) `register` creates a principal, `login` opens a session.
//! 2) `refresh` rotates the refresh secret and mints a new access token.
//! 3) Bearer routes verify the access token with the live session check.

use super::{client_meta, require_auth};
use crate::{
    api::{error::ErrorBody, AppState},
    error::AuthError,
    lifecycle::TokenPair,
    principal::{Principal, PrincipalId, PrincipalStatus, Role},
    session::{Session, SessionId},
    token::AccessClaims,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PrincipalResponse {
    pub id: PrincipalId,
    pub username: Option<String>,
    pub email: String,
    pub role: Role,
    pub status: PrincipalStatus,
}

impl From<Principal> for PrincipalResponse {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username,
            email: principal.email,
            role: principal.role,
            status: principal.status,
        }
    }
}

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    /// Optional; when present it must name the session the secret belongs to.
    pub session_id: Option<SessionId>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub principal_id: PrincipalId,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.access_expires_in,
            refresh_token: pair.refresh_secret.expose_secret().to_string(),
            refresh_expires_at: pair.refresh_expires_at,
            session_id: pair.session_id,
            principal_id: pair.principal_id,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// True for the session the caller's token belongs to.
    pub current: bool,
}

impl SessionSummary {
    fn new(session: Session, current: SessionId) -> Self {
        Self {
            current: session.id == current,
            id: session.id,
            created_at: session.created_at,
            last_used_at: session.last_used_at,
            expires_at: session.refresh_expires_at,
            ip: session.client.ip,
            user_agent: session.client.user_agent,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokedCount {
    pub revoked: u64,
}

fn missing_payload() -> AuthError {
    AuthError::InvalidInput("missing payload".to_string())
}

#[utoipa::path(
    post,
    path= "/v1/auth/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Principal created", body = PrincipalResponse),
        (status = 400, description = "Username, email or password rejected by policy", body = ErrorBody),
        (status = 409, description = "Username or email already taken", body = ErrorBody),
    ),
    tag= "auth"
)]
pub async fn register(
    Extension(state): Extension<AppState>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(request) = payload.ok_or_else(missing_payload)?;
    let principal = state
        .service
        .register(
            &request.username,
            &request.email,
            SecretString::from(request.password),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(PrincipalResponse::from(principal))))
}

#[utoipa::path(
    post,
    path= "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Session opened", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "auth"
)]
pub async fn login(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(request) = payload.ok_or_else(missing_payload)?;
    let pair = state
        .service
        .login(
            &request.username,
            SecretString::from(request.password),
            client_meta(&headers),
        )
        .await?;
    Ok(Json(pair.into()))
}

#[utoipa::path(
    post,
    path= "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Refresh secret rotated", body = TokenResponse),
        (status = 401, description = "Refresh secret invalid, expired or reused", body = ErrorBody),
    ),
    tag= "auth"
)]
pub async fn refresh(
    Extension(state): Extension<AppState>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Json(request) = payload.ok_or_else(missing_payload)?;
    let presented = SecretString::from(request.refresh_token);
    let pair = state
        .service
        .refresh(request.session_id, &presented)
        .await?;
    Ok(Json(pair.into()))
}

#[utoipa::path(
    post,
    path= "/v1/auth/logout",
    responses (
        (status = 204, description = "Current session revoked"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn logout(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AuthError> {
    let claims = require_auth(&headers, &state).await?;
    state.service.logout(claims.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path= "/v1/auth/logout-all",
    responses (
        (status = 200, description = "Every session of the caller revoked", body = RevokedCount),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn logout_all(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<RevokedCount>, AuthError> {
    let claims = require_auth(&headers, &state).await?;
    let revoked = state.service.logout_all(claims.sub).await?;
    Ok(Json(RevokedCount { revoked }))
}

#[utoipa::path(
    get,
    path= "/v1/auth/sessions",
    responses (
        (status = 200, description = "Active sessions, newest first", body = [SessionSummary]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn sessions(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, AuthError> {
    let claims = require_auth(&headers, &state).await?;
    let sessions = state.service.list_sessions(claims.sub).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|session| SessionSummary::new(session, claims.session_id))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path= "/v1/auth/me",
    responses (
        (status = 200, description = "Verified claims of the presented token", body = AccessClaims),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn me(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccessClaims>, AuthError> {
    Ok(Json(require_auth(&headers, &state).await?))
}
