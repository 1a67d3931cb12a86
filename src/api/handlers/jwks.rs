use crate::{api::AppState, keys::Jwks};
use axum::{extract::Extension, Json};

#[utoipa::path(
    get,
    path= "/.well-known/jwks.json",
    responses (
        (status = 200, description = "Published verification keys, active key first", body = Jwks),
    ),
    tag= "keys"
)]
pub async fn jwks(Extension(state): Extension<AppState>) -> Json<Jwks> {
    Json(state.service.issuer().keys().public_key_set().await)
}
