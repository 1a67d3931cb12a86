use super::{
    claims::AccessClaims,
    jwt,
    refresh::{generate_refresh_secret, hash_refresh_secret, RefreshHash},
};
use crate::{
    error::AuthError,
    keys::KeyManager,
    principal::{PrincipalId, Role},
    session::SessionId,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ISSUER: &str = "tessera";
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 604_800;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What an access token asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub session_id: SessionId,
    pub principal_id: PrincipalId,
    pub role: Role,
    pub tenant_id: Option<String>,
    pub token_version: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub kid: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshSecret {
    pub secret: SecretString,
    pub hash: RefreshHash,
    pub expires_at: DateTime<Utc>,
}

/// Mints access tokens and refresh secrets.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    config: TokenConfig,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(keys: Arc<KeyManager>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// # Errors
    ///
    /// Returns an error if no key is active or encoding fails.
    pub async fn issue_access_token(
        &self,
        grant: &AccessGrant,
        now: DateTime<Utc>,
    ) -> Result<IssuedAccessToken> {
        let active = self.keys.active_key().await?;
        let expires_at = now + Duration::seconds(self.config.access_ttl_seconds);
        let claims = AccessClaims {
            sub: grant.principal_id,
            session_id: grant.session_id,
            role: grant.role,
            tenant_id: grant.tenant_id.clone(),
            ver: grant.token_version,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
        };
        let token = jwt::sign_eddsa(&active.signing_key, active.kid.clone(), &claims)
            .context("failed to sign access token")?;
        debug!(
            kid = active.kid.as_str(),
            session_id = %grant.session_id,
            "access token issued"
        );
        Ok(IssuedAccessToken {
            token,
            kid: active.kid,
            expires_in: self.config.access_ttl_seconds,
            expires_at,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the OS random source fails.
    pub fn issue_refresh_secret(&self, now: DateTime<Utc>) -> Result<IssuedRefreshSecret> {
        let secret = generate_refresh_secret()?;
        let hash = hash_refresh_secret(secret.expose_secret());
        Ok(IssuedRefreshSecret {
            secret,
            hash,
            expires_at: now + Duration::seconds(self.config.refresh_ttl_seconds),
        })
    }

    /// Signature, issuer and expiry check against the local key ring.
    /// Revocation is layered on by [`crate::gateway::Gateway`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] past `exp`, otherwise [`AuthError::TokenInvalid`].
    pub async fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, AuthError> {
        let jwks = self.keys.public_key_set().await;
        jwt::verify_eddsa(token, &jwks, &self.config.issuer, now.timestamp()).map_err(|err| {
            debug!(error = %err, "access token rejected");
            AuthError::from(err)
        })
    }
}
