use super::{Session, SessionId};
use crate::{principal::PrincipalId, token::RefreshHash};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Replacement values for a refresh rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub next_hash: RefreshHash,
    pub refresh_expires_at: DateTime<Utc>,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated,
    /// The stored hash no longer matched, or the session was revoked or expired.
    Stale,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>>;

    /// Session whose *current* refresh hash is `hash`.
    async fn find_by_refresh_hash(&self, hash: &RefreshHash) -> Result<Option<Session>>;

    /// Session that once held `hash` before rotating it away.
    async fn find_by_retired_hash(&self, hash: &RefreshHash) -> Result<Option<SessionId>>;

    /// Compare-and-swap of the refresh hash. Succeeds only if the stored hash is
    /// still `expected` and the session is neither revoked nor expired at
    /// `rotation.used_at`. The old hash moves to the session's history.
    async fn rotate(
        &self,
        id: SessionId,
        expected: &RefreshHash,
        rotation: Rotation,
    ) -> Result<RotateOutcome>;

    /// Returns true if this call revoked the session; false if it was already revoked or missing.
    async fn revoke(&self, id: SessionId, at: DateTime<Utc>) -> Result<bool>;

    async fn revoke_by_principal(&self, principal_id: PrincipalId, at: DateTime<Utc>)
        -> Result<u64>;

    /// Active sessions, newest first.
    async fn list_active_by_principal(
        &self,
        principal_id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>>;

    /// Deletes sessions that expired or were revoked before `cutoff`.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, Session>,
    by_hash: HashMap<RefreshHash, SessionId>,
    retired: HashMap<RefreshHash, SessionId>,
}

/// In-process session store. A single mutex makes every operation linearizable.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Sessions>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.by_hash.insert(session.refresh_hash.clone(), session.id);
        inner.by_id.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.inner.lock().await.by_id.get(&id).cloned())
    }

    async fn find_by_refresh_hash(&self, hash: &RefreshHash) -> Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn find_by_retired_hash(&self, hash: &RefreshHash) -> Result<Option<SessionId>> {
        Ok(self.inner.lock().await.retired.get(hash).copied())
    }

    async fn rotate(
        &self,
        id: SessionId,
        expected: &RefreshHash,
        rotation: Rotation,
    ) -> Result<RotateOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.by_id.get_mut(&id) else {
            return Ok(RotateOutcome::Stale);
        };
        if !session.refresh_hash.ct_eq(expected) || !session.is_active(rotation.used_at) {
            return Ok(RotateOutcome::Stale);
        }

        let previous = std::mem::replace(&mut session.refresh_hash, rotation.next_hash.clone());
        session.refresh_expires_at = rotation.refresh_expires_at;
        session.last_used_at = rotation.used_at;

        inner.by_hash.remove(&previous);
        inner.retired.insert(previous, id);
        inner.by_hash.insert(rotation.next_hash, id);
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, id: SessionId, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.by_id.get_mut(&id).is_some_and(|session| {
            if session.revoked_at.is_some() {
                return false;
            }
            session.revoked_at = Some(at);
            true
        }))
    }

    async fn revoke_by_principal(
        &self,
        principal_id: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut revoked = 0;
        for session in inner
            .by_id
            .values_mut()
            .filter(|s| s.principal_id == principal_id && s.revoked_at.is_none())
        {
            session.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn list_active_by_principal(
        &self,
        principal_id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .by_id
            .values()
            .filter(|s| s.principal_id == principal_id && s.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<SessionId> = inner
            .by_id
            .values()
            .filter(|s| {
                s.refresh_expires_at < cutoff || s.revoked_at.is_some_and(|at| at < cutoff)
            })
            .map(|s| s.id)
            .collect();

        for id in &doomed {
            if let Some(session) = inner.by_id.remove(id) {
                inner.by_hash.remove(&session.refresh_hash);
            }
        }
        inner.retired.retain(|_, id| !doomed.contains(id));
        Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{session::ClientMeta, token::hash_refresh_secret};
    use chrono::Duration;

    fn session(principal_id: PrincipalId, secret: &str, now: DateTime<Utc>) -> Session {
        Session::new(
            principal_id,
            hash_refresh_secret(secret),
            now + Duration::days(7),
            ClientMeta::default(),
            now,
        )
    }

    fn rotation(secret: &str, now: DateTime<Utc>) -> Rotation {
        Rotation {
            next_hash: hash_refresh_secret(secret),
            refresh_expires_at: now + Duration::days(7),
            used_at: now,
        }
    }

    #[tokio::test]
    async fn rotate_is_compare_and_swap() -> Result<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = session(PrincipalId::new(), "one", now);
        store.create(&session).await?;

        let one = hash_refresh_secret("one");
        assert_eq!(
            store.rotate(session.id, &one, rotation("two", now)).await?,
            RotateOutcome::Rotated
        );
        // Same expected hash again: the swap already happened.
        assert_eq!(
            store.rotate(session.id, &one, rotation("three", now)).await?,
            RotateOutcome::Stale
        );

        assert!(store.find_by_refresh_hash(&one).await?.is_none());
        assert_eq!(store.find_by_retired_hash(&one).await?, Some(session.id));
        let current = store
            .find_by_refresh_hash(&hash_refresh_secret("two"))
            .await?;
        assert_eq!(current.map(|s| s.id), Some(session.id));
        Ok(())
    }

    #[tokio::test]
    async fn rotate_refuses_revoked_sessions() -> Result<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = session(PrincipalId::new(), "one", now);
        store.create(&session).await?;

        assert!(store.revoke(session.id, now).await?);
        assert!(!store.revoke(session.id, now).await?);
        assert_eq!(
            store
                .rotate(session.id, &hash_refresh_secret("one"), rotation("two", now))
                .await?,
            RotateOutcome::Stale
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoke_by_principal_leaves_others() -> Result<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let alice = PrincipalId::new();
        let bob = PrincipalId::new();
        store.create(&session(alice, "a1", now)).await?;
        store.create(&session(alice, "a2", now)).await?;
        store.create(&session(bob, "b1", now)).await?;

        assert_eq!(store.revoke_by_principal(alice, now).await?, 2);
        assert_eq!(store.revoke_by_principal(alice, now).await?, 0);
        assert!(store.list_active_by_principal(alice, now).await?.is_empty());
        assert_eq!(store.list_active_by_principal(bob, now).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn purge_drops_old_sessions_and_history() -> Result<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let old = Session {
            refresh_expires_at: now - Duration::days(40),
            ..session(PrincipalId::new(), "old", now - Duration::days(47))
        };
        let fresh = session(PrincipalId::new(), "fresh", now);
        store.create(&old).await?;
        store.create(&fresh).await?;

        assert_eq!(store.purge_expired(now - Duration::days(30)).await?, 1);
        assert!(store.find_by_id(old.id).await?.is_none());
        assert!(store.find_by_id(fresh.id).await?.is_some());
        assert!(store
            .find_by_refresh_hash(&hash_refresh_secret("old"))
            .await?
            .is_none());
        Ok(())
    }
}
