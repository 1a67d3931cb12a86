use crate::{
    principal::PrincipalId,
    session::{ClientMeta, RotateOutcome, Rotation, Session, SessionId, SessionStore},
    token::RefreshHash,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id")?),
        principal_id: PrincipalId::from_uuid(row.try_get("principal_id")?),
        refresh_hash: RefreshHash::from_bytes(row.try_get("refresh_hash")?),
        refresh_expires_at: row.try_get("refresh_expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
        client: ClientMeta {
            ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
        },
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO sessions
                (id, principal_id, refresh_hash, refresh_expires_at, created_at,
                 last_used_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.id.as_uuid())
            .bind(session.principal_id.as_uuid())
            .bind(session.refresh_hash.as_bytes())
            .bind(session.refresh_expires_at)
            .bind(session.created_at)
            .bind(session.last_used_at)
            .bind(session.client.ip.as_deref())
            .bind(session.client.user_agent.as_deref())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>> {
        let query = "SELECT * FROM sessions WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by id")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_by_refresh_hash(&self, hash: &RefreshHash) -> Result<Option<Session>> {
        let query = "SELECT * FROM sessions WHERE refresh_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash.as_bytes())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by refresh hash")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_by_retired_hash(&self, hash: &RefreshHash) -> Result<Option<SessionId>> {
        let query = "SELECT session_id FROM session_refresh_history WHERE refresh_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash.as_bytes())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup refresh history")?;
        row.map(|row| row.try_get("session_id").map(SessionId::from_uuid))
            .transpose()
            .context("failed to read session_id")
    }

    async fn rotate(
        &self,
        id: SessionId,
        expected: &RefreshHash,
        rotation: Rotation,
    ) -> Result<RotateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin rotation transaction")?;

        // The row lock taken by UPDATE serializes racers; the loser re-reads the new hash and matches nothing.
        let query = r"
            UPDATE sessions
            SET refresh_hash = $3, refresh_expires_at = $4, last_used_at = $5
            WHERE id = $1
              AND refresh_hash = $2
              AND revoked_at IS NULL
              AND refresh_expires_at > $5
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let updated = sqlx::query(query)
            .bind(id.as_uuid())
            .bind(expected.as_bytes())
            .bind(rotation.next_hash.as_bytes())
            .bind(rotation.refresh_expires_at)
            .bind(rotation.used_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to rotate refresh hash")?;

        if updated.rows_affected() != 1 {
            tx.rollback()
                .await
                .context("rollback rotation transaction")?;
            return Ok(RotateOutcome::Stale);
        }

        let query = r"
            INSERT INTO session_refresh_history (refresh_hash, session_id, retired_at)
            VALUES ($1, $2, $3)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(expected.as_bytes())
            .bind(id.as_uuid())
            .bind(rotation.used_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to record retired refresh hash")?;

        tx.commit().await.context("commit rotation transaction")?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, id: SessionId, at: DateTime<Utc>) -> Result<bool> {
        let query = "UPDATE sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_by_principal(
        &self,
        principal_id: PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let query =
            "UPDATE sessions SET revoked_at = $2 WHERE principal_id = $1 AND revoked_at IS NULL";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(principal_id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke principal sessions")?;
        Ok(result.rows_affected())
    }

    async fn list_active_by_principal(
        &self,
        principal_id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let query = r"
            SELECT * FROM sessions
            WHERE principal_id = $1 AND revoked_at IS NULL AND refresh_expires_at > $2
            ORDER BY created_at DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id.as_uuid())
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions")?;
        rows.iter().map(session_from_row).collect()
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // session_refresh_history rows go with their session (ON DELETE CASCADE).
        let query = "DELETE FROM sessions WHERE refresh_expires_at < $1 OR revoked_at < $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        postgres::{test_support::test_db, PgPrincipalStore},
        principal::{Principal, PrincipalStore},
        token::hash_refresh_secret,
    };
    use chrono::Duration;

    async fn seed_session(pool: &PgPool, secret: &str) -> Result<Session> {
        let principal = Principal::new(Some("alice".into()), "alice@x.com".into(), None);
        PgPrincipalStore::new(pool.clone()).insert(&principal).await?;

        let now = Utc::now();
        let session = Session::new(
            principal.id,
            hash_refresh_secret(secret),
            now + Duration::days(1),
            ClientMeta {
                ip: Some("10.0.0.1".into()),
                user_agent: Some("curl/8".into()),
            },
            now,
        );
        PgSessionStore::new(pool.clone()).create(&session).await?;
        Ok(session)
    }

    fn rotation(secret: &str) -> Rotation {
        let now = Utc::now();
        Rotation {
            next_hash: hash_refresh_secret(secret),
            refresh_expires_at: now + Duration::days(1),
            used_at: now,
        }
    }

    async fn history_rows(pool: &PgPool, id: SessionId) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM session_refresh_history WHERE session_id = $1")
                .bind(id.as_uuid())
                .fetch_one(pool)
                .await?;
        Ok(row.try_get("n")?)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotations_have_one_winner() -> Result<()> {
        let Some(db) = test_db().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(db.pool.clone());
        let session = seed_session(&db.pool, "original").await?;

        let race = |next: &'static str| {
            let store = store.clone();
            let expected = session.refresh_hash.clone();
            let id = session.id;
            tokio::spawn(async move { store.rotate(id, &expected, rotation(next)).await })
        };
        let (a, b) = tokio::try_join!(race("next-a"), race("next-b"))?;
        let outcomes = [a?, b?];

        let rotated = outcomes
            .iter()
            .filter(|outcome| **outcome == RotateOutcome::Rotated)
            .count();
        assert_eq!(rotated, 1);
        assert!(outcomes.contains(&RotateOutcome::Stale));

        let current = store
            .find_by_id(session.id)
            .await?
            .map(|s| s.refresh_hash)
            .context("session vanished")?;
        assert!(
            current == hash_refresh_secret("next-a") || current == hash_refresh_secret("next-b")
        );
        assert_eq!(history_rows(&db.pool, session.id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rotated_hash_moves_to_history() -> Result<()> {
        let Some(db) = test_db().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(db.pool.clone());
        let session = seed_session(&db.pool, "first").await?;

        assert_eq!(
            store
                .rotate(session.id, &session.refresh_hash, rotation("second"))
                .await?,
            RotateOutcome::Rotated
        );

        assert!(store.find_by_refresh_hash(&session.refresh_hash).await?.is_none());
        assert_eq!(
            store.find_by_retired_hash(&session.refresh_hash).await?,
            Some(session.id)
        );
        let found = store
            .find_by_refresh_hash(&hash_refresh_secret("second"))
            .await?;
        assert_eq!(found.as_ref().map(|s| s.id), Some(session.id));
        assert_eq!(
            found.and_then(|s| s.client.user_agent).as_deref(),
            Some("curl/8")
        );
        assert!(store
            .find_by_retired_hash(&hash_refresh_secret("second"))
            .await?
            .is_none());

        // The old hash no longer matches.
        assert_eq!(
            store
                .rotate(session.id, &session.refresh_hash, rotation("third"))
                .await?,
            RotateOutcome::Stale
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoked_session_does_not_rotate() -> Result<()> {
        let Some(db) = test_db().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(db.pool.clone());
        let session = seed_session(&db.pool, "first").await?;

        assert!(store.revoke(session.id, Utc::now()).await?);
        assert!(!store.revoke(session.id, Utc::now()).await?);
        assert_eq!(
            store
                .rotate(session.id, &session.refresh_hash, rotation("second"))
                .await?,
            RotateOutcome::Stale
        );
        assert_eq!(history_rows(&db.pool, session.id).await?, 0);
        assert!(store
            .list_active_by_principal(session.principal_id, Utc::now())
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn purge_takes_history_along() -> Result<()> {
        let Some(db) = test_db().await? else {
            return Ok(());
        };
        let store = PgSessionStore::new(db.pool.clone());
        let old = seed_session(&db.pool, "old").await?;
        store
            .rotate(old.id, &old.refresh_hash, rotation("old-next"))
            .await?;
        assert_eq!(history_rows(&db.pool, old.id).await?, 1);

        let live = Session::new(
            old.principal_id,
            hash_refresh_secret("live"),
            Utc::now() + Duration::days(1),
            ClientMeta::default(),
            Utc::now(),
        );
        store.create(&live).await?;

        let now = Utc::now();
        store.revoke(old.id, now - Duration::days(3)).await?;
        assert_eq!(store.purge_expired(now - Duration::days(1)).await?, 1);

        assert!(store.find_by_id(old.id).await?.is_none());
        assert_eq!(history_rows(&db.pool, old.id).await?, 0);
        assert!(store.find_by_retired_hash(&old.refresh_hash).await?.is_none());
        assert!(store.find_by_id(live.id).await?.is_some());
        Ok(())
    }
}
