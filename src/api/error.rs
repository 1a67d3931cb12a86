use crate::error::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

// Token and credential rejections all look the same on the wire; the cause is only logged.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::AlreadyExists => (StatusCode::CONFLICT, "already exists".to_string()),
            Self::InvalidInput(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            Self::Unavailable(err) => {
                error!("Request failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
            _ => {
                debug!(reason = self.kind(), "request rejected");
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
