//! Login sessions.
//!
//! One session per login. A session holds the hash of exactly one live refresh
//! secret; every successful refresh swaps that hash atomically. Revoked and
//! expired are terminal states.

pub mod store;

pub use store::{MemorySessionStore, RotateOutcome, Rotation, SessionStore};

use crate::{principal::PrincipalId, token::RefreshHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = String, format = Uuid)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Client context recorded at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub refresh_hash: RefreshHash,
    pub refresh_expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub client: ClientMeta,
}

impl Session {
    #[must_use]
    pub fn new(
        principal_id: PrincipalId,
        refresh_hash: RefreshHash,
        refresh_expires_at: DateTime<Utc>,
        client: ClientMeta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            principal_id,
            refresh_hash,
            refresh_expires_at,
            revoked_at: None,
            created_at: now,
            last_used_at: now,
            client,
        }
    }

    /// Revocation wins over expiry.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if now >= self.refresh_expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Active
    }
}
