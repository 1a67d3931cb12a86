//! Session lifecycle: register, login, refresh, logout and revocation.
//!
//! This is the only place that drives the principal store, the session store
//! and the token issuer together. Every expected failure comes back as a typed
//! [`AuthError`]; the precise cause is logged here and nowhere else.

pub mod config;
mod sweeper;

pub use config::{LifecycleConfig, RefreshReusePolicy};
pub use sweeper::spawn_session_sweeper;

use crate::{
    error::AuthError,
    principal::{
        validation, ExternalIdentity, InsertOutcome, PasswordHasher, Principal, PrincipalId,
        PrincipalStatus, PrincipalStore, Role, StatusChange,
    },
    session::{ClientMeta, RotateOutcome, Rotation, Session, SessionId, SessionState, SessionStore},
    token::{hash_refresh_secret, AccessGrant, RefreshHash, TokenIssuer},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credentials handed back by login and refresh. The refresh secret is never stored in clear.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub principal_id: PrincipalId,
    pub session_id: SessionId,
    pub access_token: String,
    pub access_expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_secret: SecretString,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct SessionService {
    principals: Arc<dyn PrincipalStore>,
    sessions: Arc<dyn SessionStore>,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
    config: LifecycleConfig,
    /// Verified against when the principal is unknown, so misses cost the same as wrong passwords.
    dummy_hash: String,
}

impl SessionService {
    /// # Errors
    ///
    /// Returns an error if the timing-equalization hash cannot be computed.
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        sessions: Arc<dyn SessionStore>,
        issuer: TokenIssuer,
        hasher: PasswordHasher,
        config: LifecycleConfig,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hasher.hash(&SecretString::from("tessera-dummy-password"))?;
        Ok(Self {
            principals,
            sessions,
            issuer,
            hasher,
            config,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn principals(&self) -> &Arc<dyn PrincipalStore> {
        &self.principals
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Creates an active principal with the default role and a zero revocation counter.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] on policy violations, [`AuthError::AlreadyExists`] on
    /// username or email collisions.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: SecretString,
    ) -> Result<Principal, AuthError> {
        let (username, email) = validation::registration(username, email, &password)?;

        // Cheap collision check before paying for the hash; the insert below is authoritative.
        if self.principals.find_by_username(&username).await?.is_some()
            || self.principals.find_by_email(&email).await?.is_some()
        {
            debug!(username = username.as_str(), "registration collision");
            return Err(AuthError::AlreadyExists);
        }

        let password_hash = self.hasher.hash_blocking(password).await?;
        let principal = Principal::new(Some(username), email, Some(password_hash));

        match self.principals.insert(&principal).await? {
            InsertOutcome::Created => {
                info!(principal_id = %principal.id, "principal registered");
                Ok(principal)
            }
            InsertOutcome::Conflict => Err(AuthError::AlreadyExists),
        }
    }

    /// Password login. Unknown principal, inactive principal and wrong password are
    /// indistinguishable to the caller.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] on any credential failure.
    pub async fn login(
        &self,
        username: &str,
        password: SecretString,
        client: ClientMeta,
    ) -> Result<TokenPair, AuthError> {
        let username = validation::normalize_username(username);
        let principal = self.principals.find_by_username(&username).await?;

        let (principal, stored_hash) = match principal {
            Some(principal) => {
                let hash = principal.password_hash.clone();
                (Some(principal), hash)
            }
            None => (None, None),
        };
        let password_ok = match stored_hash {
            Some(hash) => self.hasher.verify_blocking(password, hash).await?,
            None => {
                self.hasher
                    .verify_blocking(password, self.dummy_hash.clone())
                    .await?;
                false
            }
        };

        let Some(principal) = principal.filter(|_| password_ok) else {
            debug!(username = username.as_str(), "login rejected: bad credentials");
            return Err(AuthError::InvalidCredentials);
        };
        if !principal.is_active() {
            debug!(
                principal_id = %principal.id,
                status = principal.status.as_str(),
                "login rejected: principal not active"
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.open_session(&principal, client).await
    }

    /// Login for an identity already authenticated by an external provider.
    /// Finds the linked principal, else links by email, else creates one.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] for malformed identities, [`AuthError::InvalidCredentials`]
    /// if the resolved principal cannot log in.
    pub async fn login_federated(
        &self,
        identity: ExternalIdentity,
        client: ClientMeta,
    ) -> Result<TokenPair, AuthError> {
        let identity = ExternalIdentity {
            email: validation::normalize_email(&identity.email),
            provider: identity.provider.trim().to_lowercase(),
            external_id: identity.external_id.trim().to_string(),
            display_name: identity.display_name,
        };
        if identity.provider.is_empty() || identity.external_id.is_empty() {
            return Err(AuthError::InvalidInput(
                "federated identity requires provider and external id".to_string(),
            ));
        }
        if !validation::valid_email(&identity.email) {
            return Err(AuthError::InvalidInput("invalid email address".to_string()));
        }

        let principal = self.resolve_federated(&identity).await?;
        let principal = self.follow_merges(principal).await?;
        if !principal.is_active() {
            debug!(
                principal_id = %principal.id,
                provider = identity.provider.as_str(),
                "federated login rejected: principal not active"
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.open_session(&principal, client).await
    }

    async fn resolve_federated(&self, identity: &ExternalIdentity) -> Result<Principal, AuthError> {
        if let Some(principal) = self
            .principals
            .find_by_identity(&identity.provider, &identity.external_id)
            .await?
        {
            return Ok(principal);
        }

        let principal = if let Some(existing) = self.principals.find_by_email(&identity.email).await? {
            existing
        } else {
            let mut principal = Principal::new(None, identity.email.clone(), None);
            principal.display_name.clone_from(&identity.display_name);
            match self.principals.insert(&principal).await? {
                InsertOutcome::Created => {
                    info!(
                        principal_id = %principal.id,
                        provider = identity.provider.as_str(),
                        "principal created from federated identity"
                    );
                    principal
                }
                // A concurrent login created it first.
                InsertOutcome::Conflict => self
                    .principals
                    .find_by_email(&identity.email)
                    .await?
                    .ok_or(AuthError::InvalidCredentials)?,
            }
        };

        match self.principals.link_identity(principal.id, identity).await? {
            InsertOutcome::Created => Ok(principal),
            InsertOutcome::Conflict => self
                .principals
                .find_by_identity(&identity.provider, &identity.external_id)
                .await?
                .ok_or(AuthError::InvalidCredentials),
        }
    }

    async fn follow_merges(&self, mut principal: Principal) -> Result<Principal, AuthError> {
        for _ in 0..config::MAX_MERGE_HOPS {
            if principal.status != PrincipalStatus::Merged {
                return Ok(principal);
            }
            let Some(target) = principal.merged_into else {
                return Err(AuthError::InvalidCredentials);
            };
            principal = self
                .principals
                .find_by_id(target)
                .await?
                .ok_or(AuthError::InvalidCredentials)?;
        }
        warn!(principal_id = %principal.id, "merge chain too long");
        Err(AuthError::InvalidCredentials)
    }

    async fn open_session(
        &self,
        principal: &Principal,
        client: ClientMeta,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let refresh = self.issuer.issue_refresh_secret(now)?;
        let session = Session::new(
            principal.id,
            refresh.hash.clone(),
            refresh.expires_at,
            client,
            now,
        );
        self.sessions.create(&session).await?;

        let access = self
            .issuer
            .issue_access_token(&grant_for(principal, session.id), now)
            .await?;
        info!(
            principal_id = %principal.id,
            session_id = %session.id,
            "session opened"
        );

        Ok(TokenPair {
            principal_id: principal.id,
            session_id: session.id,
            access_token: access.token,
            access_expires_in: access.expires_in,
            access_expires_at: access.expires_at,
            refresh_secret: refresh.secret,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Swaps the presented refresh secret for a new pair. The session is looked up by
    /// the hash of the secret; `session_id`, when given, must match it.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenInvalid`] for unknown, rotated-away or revoked secrets and for a
    /// lost rotation race; [`AuthError::TokenExpired`] once the refresh secret expired;
    /// [`AuthError::Forbidden`] if the principal can no longer log in.
    pub async fn refresh(
        &self,
        session_id: Option<SessionId>,
        presented: &SecretString,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let hash = hash_refresh_secret(presented.expose_secret());

        let Some(session) = self.sessions.find_by_refresh_hash(&hash).await? else {
            self.detect_reuse(&hash, now).await?;
            return Err(AuthError::TokenInvalid);
        };
        if session_id.is_some_and(|id| id != session.id) {
            warn!(
                session_id = %session.id,
                "refresh secret presented for a different session"
            );
            return Err(AuthError::TokenInvalid);
        }

        match session.state(now) {
            SessionState::Active => {}
            SessionState::Revoked => {
                debug!(session_id = %session.id, "refresh on revoked session");
                return Err(AuthError::TokenInvalid);
            }
            SessionState::Expired => {
                self.sessions.revoke(session.id, now).await?;
                debug!(session_id = %session.id, "refresh on expired session");
                return Err(AuthError::TokenExpired);
            }
        }

        let principal = match self.principals.find_by_id(session.principal_id).await? {
            Some(principal) if principal.is_active() => principal,
            _ => {
                self.sessions.revoke(session.id, now).await?;
                debug!(
                    session_id = %session.id,
                    principal_id = %session.principal_id,
                    "refresh for inactive principal"
                );
                return Err(AuthError::Forbidden);
            }
        };

        let next = self.issuer.issue_refresh_secret(now)?;
        let rotation = Rotation {
            next_hash: next.hash.clone(),
            refresh_expires_at: next.expires_at,
            used_at: now,
        };
        if self.sessions.rotate(session.id, &hash, rotation).await? == RotateOutcome::Stale {
            debug!(session_id = %session.id, "refresh lost rotation race");
            return Err(AuthError::TokenInvalid);
        }

        // Role and counter come from the live principal, not from any earlier token.
        let access = self
            .issuer
            .issue_access_token(&grant_for(&principal, session.id), now)
            .await?;
        debug!(session_id = %session.id, "session refreshed");

        Ok(TokenPair {
            principal_id: principal.id,
            session_id: session.id,
            access_token: access.token,
            access_expires_in: access.expires_in,
            access_expires_at: access.expires_at,
            refresh_secret: next.secret,
            refresh_expires_at: next.expires_at,
        })
    }

    async fn detect_reuse(&self, hash: &RefreshHash, now: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(session_id) = self.sessions.find_by_retired_hash(hash).await? else {
            return Ok(());
        };
        warn!(
            session_id = %session_id,
            policy = self.config.reuse_policy().as_str(),
            "refresh secret reuse detected"
        );
        if self.config.reuse_policy() == RefreshReusePolicy::Revoke {
            self.sessions.revoke(session_id, now).await?;
        }
        Ok(())
    }

    /// Revokes one session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the store fails.
    pub async fn logout(&self, session_id: SessionId) -> Result<(), AuthError> {
        if self.sessions.revoke(session_id, Utc::now()).await? {
            info!(session_id = %session_id, "session revoked");
        }
        Ok(())
    }

    /// Revokes every live session of a principal and returns how many were revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the store fails.
    pub async fn logout_all(&self, principal_id: PrincipalId) -> Result<u64, AuthError> {
        let revoked = self
            .sessions
            .revoke_by_principal(principal_id, Utc::now())
            .await?;
        info!(principal_id = %principal_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Bumps the principal's revocation counter, killing every access token issued so far.
    /// Sessions are untouched.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] if the principal does not exist.
    pub async fn force_global_revoke(&self, principal_id: PrincipalId) -> Result<i64, AuthError> {
        let version = self
            .principals
            .bump_token_version(principal_id)
            .await?
            .ok_or_else(unknown_principal)?;
        info!(principal_id = %principal_id, version, "access tokens revoked");
        Ok(version)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the store fails.
    pub async fn list_sessions(&self, principal_id: PrincipalId) -> Result<Vec<Session>, AuthError> {
        Ok(self
            .sessions
            .list_active_by_principal(principal_id, Utc::now())
            .await?)
    }

    /// Any status other than active also revokes all sessions. Merged and deleted
    /// principals keep their status forever.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] if the principal does not exist, is already merged or
    /// deleted, or `status` is `merged`.
    pub async fn set_status(
        &self,
        principal_id: PrincipalId,
        status: PrincipalStatus,
    ) -> Result<(), AuthError> {
        if status == PrincipalStatus::Merged {
            return Err(AuthError::InvalidInput(
                "use merge to mark a principal merged".to_string(),
            ));
        }
        match self.principals.set_status(principal_id, status).await? {
            StatusChange::Updated => {}
            StatusChange::NotFound => return Err(unknown_principal()),
            StatusChange::Terminal(current) => {
                warn!(
                    principal_id = %principal_id,
                    current = current.as_str(),
                    requested = status.as_str(),
                    "status change on terminal principal refused"
                );
                return Err(AuthError::InvalidInput(format!(
                    "principal is {} and cannot change status",
                    current.as_str()
                )));
            }
        }
        info!(principal_id = %principal_id, status = status.as_str(), "principal status changed");
        if status != PrincipalStatus::Active {
            self.logout_all(principal_id).await?;
        }
        Ok(())
    }

    /// Changes the role; tokens carrying the old role stop verifying.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] if the principal does not exist.
    pub async fn set_role(&self, principal_id: PrincipalId, role: Role) -> Result<i64, AuthError> {
        let version = self
            .principals
            .set_role(principal_id, role)
            .await?
            .ok_or_else(unknown_principal)?;
        info!(principal_id = %principal_id, role = role.as_str(), "principal role changed");
        Ok(version)
    }

    /// Folds `source` into `target`. The source can never authenticate again.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] if either principal is missing, merged or deleted, or they
    /// are the same.
    pub async fn merge_principals(
        &self,
        source: PrincipalId,
        target: PrincipalId,
    ) -> Result<(), AuthError> {
        self.principals
            .mark_merged(source, target)
            .await?
            .ok_or_else(|| AuthError::InvalidInput("cannot merge these principals".to_string()))?;
        self.sessions.revoke_by_principal(source, Utc::now()).await?;
        info!(source = %source, target = %target, "principals merged");
        Ok(())
    }

    /// Deletes sessions that ended longer ago than the retention window.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the store fails.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let cutoff = Utc::now() - Duration::seconds(self.config.session_retention_seconds());
        let purged = self.sessions.purge_expired(cutoff).await?;
        if purged > 0 {
            info!(purged, "expired sessions purged");
        }
        Ok(purged)
    }
}

fn grant_for(principal: &Principal, session_id: SessionId) -> AccessGrant {
    AccessGrant {
        session_id,
        principal_id: principal.id,
        role: principal.role,
        tenant_id: principal.tenant_id.clone(),
        token_version: principal.token_version,
    }
}

fn unknown_principal() -> AuthError {
    AuthError::InvalidInput("unknown principal".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        keys::KeyManager,
        principal::MemoryPrincipalStore,
        session::MemorySessionStore,
        token::TokenConfig,
    };
    use anyhow::Result;

    fn service_with(config: LifecycleConfig, tokens: TokenConfig) -> Result<SessionService> {
        SessionService::new(
            Arc::new(MemoryPrincipalStore::new()),
            Arc::new(MemorySessionStore::new()),
            TokenIssuer::new(Arc::new(KeyManager::generate()?), tokens),
            PasswordHasher::new(8, 1, 1)?,
            config,
        )
    }

    fn service() -> Result<SessionService> {
        service_with(LifecycleConfig::new(), TokenConfig::new())
    }

    async fn alice(service: &SessionService) -> Result<Principal> {
        Ok(service
            .register("alice", "alice@x.com", SecretString::from("Secret123!"))
            .await?)
    }

    fn github(email: &str) -> ExternalIdentity {
        ExternalIdentity {
            external_id: "gh-1".into(),
            provider: "GitHub".into(),
            email: email.into(),
            display_name: Some("Alice".into()),
        }
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() -> Result<()> {
        let service = service()?;
        let principal = alice(&service).await?;

        let missing = service
            .login("nobody", SecretString::from("Secret123!"), ClientMeta::default())
            .await;
        let wrong = service
            .login("alice", SecretString::from("Wrong123!"), ClientMeta::default())
            .await;
        service
            .set_status(principal.id, PrincipalStatus::Disabled)
            .await?;
        let disabled = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await;

        for result in [missing, wrong, disabled] {
            assert_eq!(result.unwrap_err().to_string(), "invalid credentials");
        }
        Ok(())
    }

    #[tokio::test]
    async fn login_is_case_insensitive_on_username() -> Result<()> {
        let service = service()?;
        alice(&service).await?;
        let pair = service
            .login("  ALICE ", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        assert!(!pair.access_token.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn expired_refresh_secret_revokes_session() -> Result<()> {
        let service = service_with(
            LifecycleConfig::new(),
            TokenConfig::new().with_refresh_ttl_seconds(0),
        )?;
        alice(&service).await?;
        let pair = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;

        let result = service.refresh(None, &pair.refresh_secret).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
        let session = service.sessions().find_by_id(pair.session_id).await?.unwrap();
        assert!(session.revoked_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rejects_mismatched_session_id() -> Result<()> {
        let service = service()?;
        alice(&service).await?;
        let pair = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        let result = service
            .refresh(Some(SessionId::new()), &pair.refresh_secret)
            .await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
        assert!(service
            .refresh(Some(pair.session_id), &pair.refresh_secret)
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn reuse_revokes_session_by_default() -> Result<()> {
        let service = service()?;
        alice(&service).await?;
        let first = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        let second = service.refresh(None, &first.refresh_secret).await?;

        assert!(matches!(
            service.refresh(None, &first.refresh_secret).await,
            Err(AuthError::TokenInvalid)
        ));
        // The legitimate holder of the newest secret is locked out as well.
        assert!(matches!(
            service.refresh(None, &second.refresh_secret).await,
            Err(AuthError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reuse_only_rejects_under_reject_policy() -> Result<()> {
        let service = service_with(
            LifecycleConfig::new().with_reuse_policy(RefreshReusePolicy::Reject),
            TokenConfig::new(),
        )?;
        alice(&service).await?;
        let first = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        let second = service.refresh(None, &first.refresh_secret).await?;

        assert!(service.refresh(None, &first.refresh_secret).await.is_err());
        assert!(service.refresh(None, &second.refresh_secret).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_picks_up_role_change() -> Result<()> {
        let service = service()?;
        let principal = alice(&service).await?;
        let pair = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        service.set_role(principal.id, Role::Admin).await?;

        let refreshed = service.refresh(None, &pair.refresh_secret).await?;
        let claims = service
            .issuer()
            .verify_access_token(&refreshed.access_token, Utc::now())
            .await?;
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.ver, 1);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_for_disabled_principal_is_forbidden() -> Result<()> {
        let service = service()?;
        let principal = alice(&service).await?;
        let pair = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        // Disable without going through the service so the session stays open.
        service
            .principals()
            .set_status(principal.id, PrincipalStatus::Locked)
            .await?;

        assert!(matches!(
            service.refresh(None, &pair.refresh_secret).await,
            Err(AuthError::Forbidden)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn federated_login_links_by_email_then_by_identity() -> Result<()> {
        let service = service()?;
        let principal = alice(&service).await?;

        let first = service
            .login_federated(github("Alice@X.com"), ClientMeta::default())
            .await?;
        assert_eq!(first.principal_id, principal.id);

        // Email changed at the provider; the identity link still resolves.
        let second = service
            .login_federated(github("alice@elsewhere.com"), ClientMeta::default())
            .await?;
        assert_eq!(second.principal_id, principal.id);
        Ok(())
    }

    #[tokio::test]
    async fn federated_login_creates_passwordless_principal() -> Result<()> {
        let service = service()?;
        let pair = service
            .login_federated(github("new@x.com"), ClientMeta::default())
            .await?;
        let principal = service
            .principals()
            .find_by_id(pair.principal_id)
            .await?
            .unwrap();
        assert!(principal.password_hash.is_none());
        assert!(principal.username.is_none());
        assert_eq!(principal.display_name.as_deref(), Some("Alice"));
        assert_eq!(principal.role, Role::User);
        Ok(())
    }

    #[tokio::test]
    async fn federated_login_follows_merges() -> Result<()> {
        let service = service()?;
        let federated = service
            .login_federated(github("old@x.com"), ClientMeta::default())
            .await?;
        let survivor = alice(&service).await?;
        service
            .merge_principals(federated.principal_id, survivor.id)
            .await?;

        let pair = service
            .login_federated(github("old@x.com"), ClientMeta::default())
            .await?;
        assert_eq!(pair.principal_id, survivor.id);
        assert!(matches!(
            service.refresh(None, &federated.refresh_secret).await,
            Err(AuthError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn federated_login_rejects_malformed_identity() -> Result<()> {
        let service = service()?;
        let mut identity = github("alice@x.com");
        identity.provider = " ".into();
        assert!(matches!(
            service.login_federated(identity, ClientMeta::default()).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            service
                .login_federated(github("not-an-email"), ClientMeta::default())
                .await,
            Err(AuthError::InvalidInput(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn admin_operations_reject_unknown_principals() -> Result<()> {
        let service = service()?;
        let ghost = PrincipalId::new();
        assert!(matches!(
            service.force_global_revoke(ghost).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            service.set_role(ghost, Role::Guest).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            service.set_status(ghost, PrincipalStatus::Locked).await,
            Err(AuthError::InvalidInput(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn merged_and_deleted_principals_stay_put() -> Result<()> {
        let service = service()?;
        let source = alice(&service).await?;
        let survivor = service
            .register("bob", "bob@x.com", SecretString::from("Secret123!"))
            .await?;
        let gone = service
            .register("carol", "carol@x.com", SecretString::from("Secret123!"))
            .await?;

        service.merge_principals(source.id, survivor.id).await?;
        service.set_status(gone.id, PrincipalStatus::Deleted).await?;

        for (id, terminal) in [
            (source.id, PrincipalStatus::Merged),
            (gone.id, PrincipalStatus::Deleted),
        ] {
            for status in [PrincipalStatus::Active, PrincipalStatus::Disabled] {
                assert!(matches!(
                    service.set_status(id, status).await,
                    Err(AuthError::InvalidInput(_))
                ));
            }
            let state = service.principals().state(id).await?;
            assert_eq!(state.map(|s| s.status), Some(terminal));
        }

        assert!(matches!(
            service.merge_principals(gone.id, survivor.id).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            service
                .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sweep_respects_retention() -> Result<()> {
        let service = service_with(
            LifecycleConfig::new().with_session_retention_seconds(0),
            TokenConfig::new(),
        )?;
        alice(&service).await?;
        let pair = service
            .login("alice", SecretString::from("Secret123!"), ClientMeta::default())
            .await?;
        assert_eq!(service.sweep_expired().await?, 0);

        service.logout(pair.session_id).await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.sweep_expired().await?, 1);
        assert!(service.sessions().find_by_id(pair.session_id).await?.is_none());
        Ok(())
    }
}
