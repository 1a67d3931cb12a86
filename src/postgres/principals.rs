use super::is_unique_violation;
use crate::principal::{
    ExternalIdentity, InsertOutcome, Principal, PrincipalId, PrincipalState, PrincipalStatus,
    PrincipalStore, Role, StatusChange,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

const SELECT_PRINCIPAL: &str = r"
    SELECT id, username, email, display_name, password_hash, status, role,
           token_version, tenant_id, merged_into, created_at, updated_at
    FROM principals
";

#[derive(Debug, Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by_text(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Principal>> {
        let query = format!("{SELECT_PRINCIPAL} WHERE {column} = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to lookup principal by {column}"))?;
        row.as_ref().map(principal_from_row).transpose()
    }

    /// Runs an `UPDATE ... RETURNING token_version` and reports the new counter.
    async fn update_returning_version(
        &self,
        query: &'static str,
        id: PrincipalId,
        value: Option<&str>,
    ) -> Result<Option<i64>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let mut statement = sqlx::query(query).bind(id.as_uuid());
        if let Some(value) = value {
            statement = statement.bind(value);
        }
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update principal")?;
        row.map(|row| row.try_get::<i64, _>("token_version"))
            .transpose()
            .context("failed to read token_version")
    }
}

fn principal_from_row(row: &PgRow) -> Result<Principal> {
    let status: String = row.try_get("status")?;
    let role: String = row.try_get("role")?;
    Ok(Principal {
        id: PrincipalId::from_uuid(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        password_hash: row.try_get("password_hash")?,
        status: PrincipalStatus::from_db(&status)
            .ok_or_else(|| anyhow!("unknown principal status: {status}"))?,
        role: Role::from_db(&role).ok_or_else(|| anyhow!("unknown role: {role}"))?,
        token_version: row.try_get("token_version")?,
        tenant_id: row.try_get("tenant_id")?,
        merged_into: row
            .try_get::<Option<Uuid>, _>("merged_into")?
            .map(PrincipalId::from_uuid),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn insert(&self, principal: &Principal) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO principals
                (id, username, email, display_name, password_hash, status, role,
                 token_version, tenant_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(principal.id.as_uuid())
            .bind(principal.username.as_deref())
            .bind(&principal.email)
            .bind(principal.display_name.as_deref())
            .bind(principal.password_hash.as_deref())
            .bind(principal.status.as_str())
            .bind(principal.role.as_str())
            .bind(principal.token_version)
            .bind(principal.tenant_id.as_deref())
            .bind(principal.created_at)
            .bind(principal.updated_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert principal"),
        }
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>> {
        let query = format!("{SELECT_PRINCIPAL} WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal by id")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        self.fetch_one_by_text("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.fetch_one_by_text("email", email).await
    }

    async fn find_by_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Principal>> {
        let query = r"
            SELECT p.id, p.username, p.email, p.display_name, p.password_hash, p.status, p.role,
                   p.token_version, p.tenant_id, p.merged_into, p.created_at, p.updated_at
            FROM principal_identities i
            JOIN principals p ON p.id = i.principal_id
            WHERE i.provider = $1 AND i.external_id = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(provider)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal by identity")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn link_identity(
        &self,
        id: PrincipalId,
        identity: &ExternalIdentity,
    ) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO principal_identities (provider, external_id, principal_id, email)
            VALUES ($1, $2, $3, $4)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&identity.provider)
            .bind(&identity.external_id)
            .bind(id.as_uuid())
            .bind(&identity.email)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to link identity"),
        }
    }

    async fn state(&self, id: PrincipalId) -> Result<Option<PrincipalState>> {
        let query = "SELECT status, token_version FROM principals WHERE id = $1";
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
            .context("failed to lookup principal state")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(PrincipalState {
            status: PrincipalStatus::from_db(&status)
                .ok_or_else(|| anyhow!("unknown principal status: {status}"))?,
            token_version: row.try_get("token_version")?,
        }))
    }

    async fn bump_token_version(&self, id: PrincipalId) -> Result<Option<i64>> {
        self.update_returning_version(
            r"
            UPDATE principals
            SET token_version = token_version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING token_version
            ",
            id,
            None,
        )
        .await
    }

    async fn set_status(&self, id: PrincipalId, status: PrincipalStatus) -> Result<StatusChange> {
        let query = r"
            UPDATE principals
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('merged', 'deleted')
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update principal status")?;
        if result.rows_affected() == 1 {
            return Ok(StatusChange::Updated);
        }

        // Terminal statuses never change back, so this read cannot race the update.
        Ok(match self.state(id).await? {
            Some(state) if state.status.is_terminal() => StatusChange::Terminal(state.status),
            _ => StatusChange::NotFound,
        })
    }

    async fn set_role(&self, id: PrincipalId, role: Role) -> Result<Option<i64>> {
        self.update_returning_version(
            r"
            UPDATE principals
            SET role = $2, token_version = token_version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING token_version
            ",
            id,
            Some(role.as_str()),
        )
        .await
    }

    async fn mark_merged(&self, source: PrincipalId, target: PrincipalId) -> Result<Option<i64>> {
        if source == target {
            return Ok(None);
        }
        let query = r"
            UPDATE principals
            SET status = 'merged', merged_into = $2,
                token_version = token_version + 1, updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('merged', 'deleted')
              AND EXISTS (
                  SELECT 1 FROM principals
                  WHERE id = $2 AND status NOT IN ('merged', 'deleted')
              )
            RETURNING token_version
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(source.as_uuid())
            .bind(target.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to merge principals")?;
        row.map(|row| row.try_get::<i64, _>("token_version"))
            .transpose()
            .context("failed to read token_version")
    }
}
