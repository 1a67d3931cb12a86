//! Principal persistence seam.
//!
//! `MemoryPrincipalStore` backs tests and single-node development runs; the
//! Postgres implementation lives in [`crate::postgres`].

use super::{ExternalIdentity, Principal, PrincipalId, PrincipalState, PrincipalStatus, Role};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

/// Result of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Updated,
    NotFound,
    /// The principal is merged or deleted and keeps that status forever.
    Terminal(PrincipalStatus),
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Inserts a new principal. Username or email collisions yield [`InsertOutcome::Conflict`].
    async fn insert(&self, principal: &Principal) -> Result<InsertOutcome>;

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>>;

    /// `username` must already be normalized.
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    async fn find_by_identity(&self, provider: &str, external_id: &str)
        -> Result<Option<Principal>>;

    /// Binds an external identity to a principal. An identity already bound elsewhere is a conflict.
    async fn link_identity(
        &self,
        id: PrincipalId,
        identity: &ExternalIdentity,
    ) -> Result<InsertOutcome>;

    /// Live status and revocation counter, read on every gateway verification.
    async fn state(&self, id: PrincipalId) -> Result<Option<PrincipalState>>;

    /// Increments the revocation counter and returns the new value.
    async fn bump_token_version(&self, id: PrincipalId) -> Result<Option<i64>>;

    /// Changes the status unless the current one is terminal.
    async fn set_status(&self, id: PrincipalId, status: PrincipalStatus) -> Result<StatusChange>;

    /// Changes the role and bumps the revocation counter in the same write.
    async fn set_role(&self, id: PrincipalId, role: Role) -> Result<Option<i64>>;

    /// Marks `source` as merged into `target` and bumps its revocation counter.
    /// Neither side may already be merged or deleted.
    async fn mark_merged(&self, source: PrincipalId, target: PrincipalId) -> Result<Option<i64>>;
}

#[derive(Default)]
struct Principals {
    by_id: HashMap<PrincipalId, Principal>,
    identities: HashMap<(String, String), PrincipalId>,
}

impl Principals {
    fn collides(&self, principal: &Principal) -> bool {
        self.by_id.values().any(|existing| {
            existing.email == principal.email
                || (principal.username.is_some() && existing.username == principal.username)
        })
    }
}

#[derive(Default)]
pub struct MemoryPrincipalStore {
    inner: RwLock<Principals>,
}

impl MemoryPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn insert(&self, principal: &Principal) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&principal.id) || inner.collides(principal) {
            return Ok(InsertOutcome::Conflict);
        }
        inner.by_id.insert(principal.id, principal.clone());
        Ok(InsertOutcome::Created)
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        Ok(self
            .inner
            .read()
            .await
            .by_id
            .values()
            .find(|p| p.username.as_deref() == Some(username))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        Ok(self
            .inner
            .read()
            .await
            .by_id
            .values()
            .find(|p| p.email == email)
            .cloned())
    }

    async fn find_by_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Principal>> {
        let inner = self.inner.read().await;
        Ok(inner
            .identities
            .get(&(provider.to_string(), external_id.to_string()))
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn link_identity(
        &self,
        id: PrincipalId,
        identity: &ExternalIdentity,
    ) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;
        let key = (identity.provider.clone(), identity.external_id.clone());
        if inner.identities.contains_key(&key) || !inner.by_id.contains_key(&id) {
            return Ok(InsertOutcome::Conflict);
        }
        inner.identities.insert(key, id);
        Ok(InsertOutcome::Created)
    }

    async fn state(&self, id: PrincipalId) -> Result<Option<PrincipalState>> {
        Ok(self.inner.read().await.by_id.get(&id).map(Principal::state))
    }

    async fn bump_token_version(&self, id: PrincipalId) -> Result<Option<i64>> {
        let mut inner = self.inner.write().await;
        Ok(inner.by_id.get_mut(&id).map(|principal| {
            principal.token_version += 1;
            principal.updated_at = Utc::now();
            principal.token_version
        }))
    }

    async fn set_status(&self, id: PrincipalId, status: PrincipalStatus) -> Result<StatusChange> {
        let mut inner = self.inner.write().await;
        let Some(principal) = inner.by_id.get_mut(&id) else {
            return Ok(StatusChange::NotFound);
        };
        if principal.status.is_terminal() {
            return Ok(StatusChange::Terminal(principal.status));
        }
        principal.status = status;
        principal.updated_at = Utc::now();
        Ok(StatusChange::Updated)
    }

    async fn set_role(&self, id: PrincipalId, role: Role) -> Result<Option<i64>> {
        let mut inner = self.inner.write().await;
        Ok(inner.by_id.get_mut(&id).map(|principal| {
            principal.role = role;
            principal.token_version += 1;
            principal.updated_at = Utc::now();
            principal.token_version
        }))
    }

    async fn mark_merged(&self, source: PrincipalId, target: PrincipalId) -> Result<Option<i64>> {
        let mut inner = self.inner.write().await;
        let target_open = inner
            .by_id
            .get(&target)
            .is_some_and(|principal| !principal.status.is_terminal());
        if source == target || !target_open {
            return Ok(None);
        }
        Ok(inner
            .by_id
            .get_mut(&source)
            .filter(|principal| !principal.status.is_terminal())
            .map(|principal| {
                principal.status = PrincipalStatus::Merged;
                principal.merged_into = Some(target);
                principal.token_version += 1;
                principal.updated_at = Utc::now();
                principal.token_version
            }))
    }
}
