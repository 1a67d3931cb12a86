//! Typed outcomes of the session and token lifecycle.
//!
//! Every rejection a caller can observe is one of these variants. Only
//! infrastructure failures (a store that cannot be reached, a key set that
//! cannot be fetched) travel as [`AuthError::Unavailable`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown principal, inactive principal or wrong password. Never says which.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("principal already exists")]
    AlreadyExists,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("token invalid")]
    TokenInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("session revoked")]
    RevokedSession,
    #[error("forbidden")]
    Forbidden,
    #[error("service unavailable")]
    Unavailable(#[from] anyhow::Error),
}

impl AuthError {
    /// True for the expected, typed rejections; false for infrastructure failures.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }

    /// Short label used in audit logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AlreadyExists => "already_exists",
            Self::InvalidInput(_) => "invalid_input",
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::RevokedSession => "revoked_session",
            Self::Forbidden => "forbidden",
            Self::Unavailable(_) => "unavailable",
        }
    }
}
