#![allow(clippy::needless_for_each)]

use super::{
    error::ErrorBody,
    handlers::{admin, auth, health, jwks},
};
use crate::{
    keys::{Jwk, Jwks},
    principal::{PrincipalId, PrincipalStatus, Role},
    session::SessionId,
    token::AccessClaims,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        jwks::jwks,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::logout_all,
        auth::sessions,
        auth::me,
        admin::revoke_tokens,
        admin::logout_all,
        admin::set_status,
        admin::rotate_keys,
    ),
    components(
        schemas(
            ErrorBody,
            health::Health,
            Jwks,
            Jwk,
            AccessClaims,
            PrincipalId,
            SessionId,
            PrincipalStatus,
            Role,
            auth::PrincipalResponse,
            auth::TokenResponse,
            auth::SessionSummary,
            auth::RevokedCount,
            admin::TokenVersion,
            admin::StatusRequest,
            admin::RotatedKey,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration, login, refresh and logout"),
        (name = "admin", description = "Principal and key administration"),
        (name = "keys", description = "Published verification keys"),
        (name = "health", description = "Liveness"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
