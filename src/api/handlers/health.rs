use crate::{api::AppState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// Key id new access tokens are signed with; absent when no key can sign.
    signing_kid: Option<String>,
    /// Number of keys currently published in the JWKS.
    published_keys: usize,
}

fn x_app_header(commit: &str) -> HeaderMap {
    let short_hash = commit.get(..7).unwrap_or_default();
    let mut headers = HeaderMap::new();
    match format!(
        "{}:{}:{short_hash}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
    .parse::<HeaderValue>()
    {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to build X-App header: {err}"),
    }
    headers
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is up and can sign tokens", body = Health),
        (status = 503, description = "No active signing key", body = Health),
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, Extension(state): Extension<AppState>) -> impl IntoResponse {
    let keys = state.service.issuer().keys();
    let signing_kid = match keys.active_key().await {
        Ok(active) => Some(active.kid),
        Err(err) => {
            warn!("health: no active signing key: {err}");
            None
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        published_keys: keys.public_key_set().await.keys.len(),
        signing_kid,
    };

    let status = if health.signing_kid.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    (status, x_app_header(&health.commit), body)
}
