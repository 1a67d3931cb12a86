//! Edge verification of access tokens.
//!
//! Any service holding the issuer's public key set can run this. Signature,
//! issuer and expiry are checked offline; the principal's live revocation
//! counter and status are always compared; the session itself is only
//! consulted when the caller asks for [`SessionCheck::RequireActiveSession`].

use crate::{
    error::AuthError,
    keys::KeySetCache,
    principal::{PrincipalStatus, PrincipalStore},
    session::{SessionState, SessionStore},
    token::{jwt, AccessClaims},
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionCheck {
    /// Per-session logout becomes visible within one access-token TTL.
    #[default]
    Stateless,
    /// Look the session up on every request; logout is visible immediately.
    RequireActiveSession,
}

pub struct Gateway {
    keys: KeySetCache,
    issuer: String,
    principals: Arc<dyn PrincipalStore>,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        keys: KeySetCache,
        issuer: impl Into<String>,
        principals: Arc<dyn PrincipalStore>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            principals,
            sessions: None,
        }
    }

    #[must_use]
    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// # Errors
    ///
    /// - [`AuthError::TokenInvalid`]: bad signature, unknown kid, wrong issuer, unknown session
    ///   or principal.
    /// - [`AuthError::TokenExpired`]: past `exp`, or the session expired.
    /// - [`AuthError::RevokedSession`]: revoked session or revocation counter mismatch.
    /// - [`AuthError::Forbidden`]: the principal is no longer active.
    pub async fn authenticate(
        &self,
        token: &str,
        check: SessionCheck,
    ) -> Result<AccessClaims, AuthError> {
        self.authenticate_at(token, check, Utc::now()).await
    }

    /// [`Self::authenticate`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::authenticate`].
    pub async fn authenticate_at(
        &self,
        token: &str,
        check: SessionCheck,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, AuthError> {
        let claims = self.verify_signature(token, now).await?;

        if check == SessionCheck::RequireActiveSession {
            let Some(sessions) = &self.sessions else {
                return Err(AuthError::Unavailable(anyhow!(
                    "session check requested but no session store is configured"
                )));
            };
            let session = sessions
                .find_by_id(claims.session_id)
                .await?
                .filter(|session| session.principal_id == claims.sub)
                .ok_or(AuthError::TokenInvalid)?;
            match session.state(now) {
                SessionState::Active => {}
                SessionState::Revoked => {
                    debug!(session_id = %claims.session_id, "token for revoked session");
                    return Err(AuthError::RevokedSession);
                }
                SessionState::Expired => return Err(AuthError::TokenExpired),
            }
        }

        let state = self
            .principals
            .state(claims.sub)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        if state.status != PrincipalStatus::Active {
            debug!(
                principal_id = %claims.sub,
                status = state.status.as_str(),
                "token for inactive principal"
            );
            return Err(AuthError::Forbidden);
        }
        if state.token_version != claims.ver {
            debug!(
                principal_id = %claims.sub,
                token_version = claims.ver,
                live_version = state.token_version,
                "token revocation counter mismatch"
            );
            return Err(AuthError::RevokedSession);
        }

        Ok(claims)
    }

    async fn verify_signature(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, AuthError> {
        let jwks = self.keys.current().await?;
        match jwt::verify_eddsa(token, &jwks, &self.issuer, now.timestamp()) {
            Err(jwt::Error::UnknownKid(kid)) => {
                let refreshed = match self.keys.refresh_for_unknown_kid(&kid).await {
                    Ok(Some(jwks)) => jwks,
                    Ok(None) => return Err(AuthError::TokenInvalid),
                    Err(err) => {
                        warn!(error = %err, kid = kid.as_str(), "key set refresh failed");
                        return Err(AuthError::TokenInvalid);
                    }
                };
                jwt::verify_eddsa(token, &refreshed, &self.issuer, now.timestamp())
                    .map_err(AuthError::from)
            }
            other => other.map_err(|err| {
                debug!(error = %err, "access token rejected");
                AuthError::from(err)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys::KeyManager,
        principal::{MemoryPrincipalStore, Principal, Role},
        session::{ClientMeta, MemorySessionStore, Session},
        token::{hash_refresh_secret, AccessGrant, TokenConfig, TokenIssuer},
    };
    use anyhow::Result;
    use chrono::Duration;

    struct Fixture {
        issuer: TokenIssuer,
        gateway: Gateway,
        principals: Arc<MemoryPrincipalStore>,
        sessions: Arc<MemorySessionStore>,
        principal: Principal,
        session: Session,
    }

    async fn fixture() -> Result<Fixture> {
        let keys = Arc::new(KeyManager::generate()?);
        let issuer = TokenIssuer::new(keys.clone(), TokenConfig::new());
        let principals = Arc::new(MemoryPrincipalStore::new());
        let sessions = Arc::new(MemorySessionStore::new());

        let principal = Principal::new(Some("alice".into()), "alice@x.com".into(), None);
        principals.insert(&principal).await?;
        let now = Utc::now();
        let session = Session::new(
            principal.id,
            hash_refresh_secret("secret"),
            now + Duration::days(1),
            ClientMeta::default(),
            now,
        );
        sessions.create(&session).await?;

        let gateway = Gateway::new(
            KeySetCache::new(keys).with_refresh_cooldown(std::time::Duration::ZERO),
            "tessera",
            principals.clone(),
        )
        .with_session_store(sessions.clone());

        Ok(Fixture {
            issuer,
            gateway,
            principals,
            sessions,
            principal,
            session,
        })
    }

    impl Fixture {
        async fn token(&self) -> Result<String> {
            let grant = AccessGrant {
                session_id: self.session.id,
                principal_id: self.principal.id,
                role: Role::User,
                tenant_id: None,
                token_version: self
                    .principals
                    .state(self.principal.id)
                    .await?
                    .map_or(0, |s| s.token_version),
            };
            Ok(self.issuer.issue_access_token(&grant, Utc::now()).await?.token)
        }
    }

    #[tokio::test]
    async fn accepts_valid_token() -> Result<()> {
        let fx = fixture().await?;
        let token = fx.token().await?;
        let claims = fx
            .gateway
            .authenticate(&token, SessionCheck::RequireActiveSession)
            .await?;
        assert_eq!(claims.sub, fx.principal.id);
        assert_eq!(claims.session_id, fx.session.id);
        Ok(())
    }

    #[tokio::test]
    async fn counter_bump_rejects_old_tokens() -> Result<()> {
        let fx = fixture().await?;
        let old = fx.token().await?;
        fx.principals.bump_token_version(fx.principal.id).await?;

        assert!(matches!(
            fx.gateway.authenticate(&old, SessionCheck::Stateless).await,
            Err(AuthError::RevokedSession)
        ));
        let fresh = fx.token().await?;
        assert!(fx.gateway.authenticate(&fresh, SessionCheck::Stateless).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn session_check_is_opt_in() -> Result<()> {
        let fx = fixture().await?;
        let token = fx.token().await?;
        fx.sessions.revoke(fx.session.id, Utc::now()).await?;

        assert!(fx.gateway.authenticate(&token, SessionCheck::Stateless).await.is_ok());
        assert!(matches!(
            fx.gateway
                .authenticate(&token, SessionCheck::RequireActiveSession)
                .await,
            Err(AuthError::RevokedSession)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn inactive_principals_never_pass() -> Result<()> {
        for status in [PrincipalStatus::Deleted, PrincipalStatus::Merged] {
            let fx = fixture().await?;
            let token = fx.token().await?;
            fx.principals.set_status(fx.principal.id, status).await?;
            assert!(matches!(
                fx.gateway.authenticate(&token, SessionCheck::Stateless).await,
                Err(AuthError::Forbidden)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn picks_up_rotated_key() -> Result<()> {
        let fx = fixture().await?;
        let before = fx.token().await?;
        assert!(fx.gateway.authenticate(&before, SessionCheck::Stateless).await.is_ok());

        fx.issuer.keys().rotate().await?;
        let after = fx.token().await?;
        assert!(fx.gateway.authenticate(&after, SessionCheck::Stateless).await.is_ok());
        assert!(fx.gateway.authenticate(&before, SessionCheck::Stateless).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_garbage_and_expired() -> Result<()> {
        let fx = fixture().await?;
        assert!(matches!(
            fx.gateway.authenticate("not.a.token", SessionCheck::Stateless).await,
            Err(AuthError::TokenInvalid)
        ));

        let token = fx.token().await?;
        let later = Utc::now() + Duration::hours(1);
        assert!(matches!(
            fx.gateway
                .authenticate_at(&token, SessionCheck::Stateless, later)
                .await,
            Err(AuthError::TokenExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn session_check_without_store_is_an_infrastructure_error() -> Result<()> {
        let fx = fixture().await?;
        let token = fx.token().await?;
        let gateway = Gateway::new(
            KeySetCache::new(fx.issuer.keys().clone()),
            "tessera",
            fx.principals.clone(),
        );
        let result = gateway
            .authenticate(&token, SessionCheck::RequireActiveSession)
            .await;
        assert!(result.is_err_and(|err| !err.is_rejection()));
        Ok(())
    }
}
