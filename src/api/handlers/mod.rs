pub mod admin;
pub mod auth;
pub mod health;
pub mod jwks;

pub use self::health::health;
pub use self::jwks::jwks;

// common functions for the handlers
use crate::{
    api::AppState,
    error::AuthError,
    gateway::SessionCheck,
    principal::{PrincipalId, Role},
    session::ClientMeta,
    token::AccessClaims,
};
use axum::http::{
    header::{AUTHORIZATION, USER_AGENT},
    HeaderMap,
};

/// Verifies the bearer token with the live session check.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<AccessClaims, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::TokenInvalid)?;
    state
        .gateway
        .authenticate(token, SessionCheck::RequireActiveSession)
        .await
}

pub(crate) async fn require_admin(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<AccessClaims, AuthError> {
    let claims = require_auth(headers, state).await?;
    if claims.role == Role::Admin {
        Ok(claims)
    } else {
        Err(AuthError::Forbidden)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Client address from the first `x-forwarded-for` hop, plus the user agent.
pub(crate) fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientMeta { ip, user_agent }
}

pub(crate) fn parse_principal_id(id: &str) -> Result<PrincipalId, AuthError> {
    id.parse()
        .map_err(|_| AuthError::InvalidInput("invalid principal id".to_string()))
}
