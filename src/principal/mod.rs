//! Principals: the identities that own sessions.
//!
//! A principal is never physically deleted. Status changes, role changes and
//! revocation counter bumps are the only mutations after creation.

pub mod password;
pub mod store;
pub mod validation;

pub use password::PasswordHasher;
pub use store::{InsertOutcome, MemoryPrincipalStore, PrincipalStore, StatusChange};

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
pub struct PrincipalId(Uuid);

impl PrincipalId {
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

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Active,
    Disabled,
    Locked,
    Deleted,
    Merged,
}

impl PrincipalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Locked => "locked",
            Self::Deleted => "deleted",
            Self::Merged => "merged",
        }
    }

    /// Merged and deleted principals never change status again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Deleted)
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            "locked" => Some(Self::Locked),
            "deleted" => Some(Self::Deleted),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    Guest,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Principal {
    pub id: PrincipalId,
    /// Absent for principals created by federated login.
    pub username: Option<String>,
    pub email: String,
    pub display_name: Option<String>,
    /// PHC string. Absent for federated-only principals.
    pub password_hash: Option<String>,
    pub status: PrincipalStatus,
    pub role: Role,
    pub token_version: i64,
    pub tenant_id: Option<String>,
    pub merged_into: Option<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// New active principal with the default role and a zero revocation counter.
    #[must_use]
    pub fn new(username: Option<String>, email: String, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PrincipalId::new(),
            username,
            email,
            display_name: None,
            password_hash,
            status: PrincipalStatus::Active,
            role: Role::default(),
            token_version: 0,
            tenant_id: None,
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }

    #[must_use]
    pub fn state(&self) -> PrincipalState {
        PrincipalState {
            status: self.status,
            token_version: self.token_version,
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("status", &self.status)
            .field("role", &self.role)
            .field("token_version", &self.token_version)
            .field("tenant_id", &self.tenant_id)
            .field("merged_into", &self.merged_into)
            .finish_non_exhaustive()
    }
}

/// The live values the gateway compares a token against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrincipalState {
    pub status: PrincipalStatus,
    pub token_version: i64,
}

/// Identity handed over by the federation layer after its own provider handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub provider: String,
    pub email: String,
    pub display_name: Option<String>,
}
