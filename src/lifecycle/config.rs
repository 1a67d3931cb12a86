use std::{fmt, str::FromStr};

pub const DEFAULT_SESSION_RETENTION_SECONDS: i64 = 2_592_000;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3600;
/// Longest `merged_into` chain followed before giving up.
pub const MAX_MERGE_HOPS: usize = 8;

/// What happens when a rotated-away refresh secret is presented again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshReusePolicy {
    /// Reject the request and revoke the whole session.
    #[default]
    Revoke,
    /// Reject the request only.
    Reject,
}

impl RefreshReusePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Revoke => "revoke",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for RefreshReusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "revoke" => Ok(Self::Revoke),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown refresh reuse policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    reuse_policy: RefreshReusePolicy,
    session_retention_seconds: i64,
    sweep_interval_seconds: u64,
}

impl LifecycleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reuse_policy: RefreshReusePolicy::default(),
            session_retention_seconds: DEFAULT_SESSION_RETENTION_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_reuse_policy(mut self, policy: RefreshReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    #[must_use]
    pub fn with_session_retention_seconds(mut self, seconds: i64) -> Self {
        self.session_retention_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn reuse_policy(&self) -> RefreshReusePolicy {
        self.reuse_policy
    }

    #[must_use]
    pub fn session_retention_seconds(&self) -> i64 {
        self.session_retention_seconds
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_policy_parses() {
        assert_eq!("revoke".parse(), Ok(RefreshReusePolicy::Revoke));
        assert_eq!(" Reject ".parse(), Ok(RefreshReusePolicy::Reject));
        assert!("ignore".parse::<RefreshReusePolicy>().is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = LifecycleConfig::new()
            .with_reuse_policy(RefreshReusePolicy::Reject)
            .with_session_retention_seconds(60)
            .with_sweep_interval_seconds(5);
        assert_eq!(config.reuse_policy(), RefreshReusePolicy::Reject);
        assert_eq!(config.session_retention_seconds(), 60);
        assert_eq!(config.sweep_interval_seconds(), 5);
        assert_eq!(
            LifecycleConfig::default().session_retention_seconds(),
            DEFAULT_SESSION_RETENTION_SECONDS
        );
    }
}
