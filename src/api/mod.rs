use crate::{gateway::Gateway, lifecycle::SessionService};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post, put},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Shared by every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub gateway: Arc<Gateway>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<SessionService>, gateway: Arc<Gateway>) -> Self {
        Self { service, gateway }
    }
}

/// Build the HTTP router with request-id, tracing and state layers applied.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/v1/auth/register", post(handlers::auth::register))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/v1/auth/sessions", get(handlers::auth::sessions))
        .route("/v1/auth/me", get(handlers::auth::me))
        .route(
            "/v1/admin/principals/:id/revoke-tokens",
            post(handlers::admin::revoke_tokens),
        )
        .route(
            "/v1/admin/principals/:id/logout-all",
            post(handlers::admin::logout_all),
        )
        .route(
            "/v1/admin/principals/:id/status",
            put(handlers::admin::set_status),
        )
        .route("/v1/admin/keys/rotate", post(handlers::admin::rotate_keys))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
