//! Verifier-side key set cache.
//!
//! Verifiers hold a copy of the issuer's public key set with a bounded TTL.
//! A token signed under an unknown kid triggers one re-fetch (subject to a
//! cooldown) so a rotation is picked up without waiting for the TTL.

use super::{jwks::Jwks, manager::KeyManager};
use crate::APP_USER_AGENT;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_REFRESH_COOLDOWN_SECONDS: u64 = 10;
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<Jwks>;

    /// Human readable origin for logs.
    fn describe(&self) -> String;
}

#[async_trait]
impl KeySetSource for KeyManager {
    async fn fetch(&self) -> Result<Jwks> {
        Ok(self.public_key_set().await)
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

/// Key set published by a remote issuer at `/.well-known/jwks.json`.
#[derive(Debug, Clone)]
pub struct RemoteKeySet {
    url: Url,
    client: Client,
}

impl RemoteKeySet {
    /// # Errors
    ///
    /// Returns an error if the issuer URL cannot be joined or the HTTP client cannot be built.
    pub fn new(issuer_url: &Url) -> Result<Self> {
        let url = issuer_url
            .join(JWKS_PATH)
            .with_context(|| format!("Invalid issuer URL: {issuer_url}"))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build JWKS HTTP client")?;
        Ok(Self { url, client })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl KeySetSource for RemoteKeySet {
    async fn fetch(&self) -> Result<Jwks> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch JWKS from {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("JWKS fetch from {} returned {status}", self.url));
        }
        response
            .json::<Jwks>()
            .await
            .context("Failed to decode JWKS response")
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

#[derive(Debug, Clone)]
struct CachedKeySet {
    jwks: Arc<Jwks>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    refresh_cooldown: Duration,
    cached: RwLock<Option<CachedKeySet>>,
    /// Unix seconds of the last forced refresh, throttles unknown-kid lookups.
    last_forced_refresh: AtomicU64,
}

impl KeySetCache {
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            refresh_cooldown: Duration::from_secs(DEFAULT_REFRESH_COOLDOWN_SECONDS),
            cached: RwLock::new(None),
            last_forced_refresh: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached key set, re-fetched once the TTL lapses. A failed re-fetch serves the stale copy.
    ///
    /// # Errors
    ///
    /// Returns an error only if nothing was ever fetched and the source is unreachable.
    pub async fn current(&self) -> Result<Arc<Jwks>> {
        let cached = self.cached.read().await.clone();
        if let Some(cached) = &cached {
            if cached.is_fresh(self.ttl) {
                return Ok(cached.jwks.clone());
            }
        }

        match self.refresh().await {
            Ok(jwks) => Ok(jwks),
            Err(err) => match cached {
                Some(stale) => {
                    warn!(
                        error = %err,
                        source = %self.source.describe(),
                        "failed to refresh key set cache, using stale copy"
                    );
                    Ok(stale.jwks)
                }
                None => Err(err),
            },
        }
    }

    /// Re-fetch after a token named a kid the cached set does not hold.
    /// Returns `None` when the cooldown suppressed the fetch.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is unreachable.
    pub async fn refresh_for_unknown_kid(&self, kid: &str) -> Result<Option<Arc<Jwks>>> {
        let now = now_unix_seconds();
        let last = self.last_forced_refresh.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.refresh_cooldown.as_secs() {
            debug!(kid, "unknown kid, key set refresh on cooldown");
            return Ok(None);
        }
        self.last_forced_refresh.store(now, Ordering::Relaxed);
        debug!(kid, "unknown kid, refreshing key set");
        self.refresh().await.map(Some)
    }

    async fn refresh(&self) -> Result<Arc<Jwks>> {
        let jwks = Arc::new(self.source.fetch().await?);
        let mut cached = self.cached.write().await;
        *cached = Some(CachedKeySet {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        debug!(
            keys = jwks.keys.len(),
            source = %self.source.describe(),
            "key set cache refreshed"
        );
        Ok(jwks)
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        manager: KeyManager,
        fetches: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KeySetSource for CountingSource {
        async fn fetch(&self) -> Result<Jwks> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(anyhow!("unreachable"));
            }
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok(self.manager.public_key_set().await)
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn counting() -> Result<Arc<CountingSource>> {
        Ok(Arc::new(CountingSource {
            manager: KeyManager::generate()?,
            fetches: AtomicUsize::new(0),
            fail: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    #[tokio::test]
    async fn fresh_cache_does_not_refetch() -> Result<()> {
        let source = counting()?;
        let cache = KeySetCache::new(source.clone());
        cache.current().await?;
        cache.current().await?;
        assert_eq!(source.fetches.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[tokio::test]
    async fn expired_ttl_refetches_and_falls_back_to_stale() -> Result<()> {
        let source = counting()?;
        let cache = KeySetCache::new(source.clone()).with_ttl(Duration::ZERO);
        let first = cache.current().await?;
        cache.current().await?;
        assert_eq!(source.fetches.load(Ordering::Relaxed), 2);

        source.fail.store(true, Ordering::Relaxed);
        let stale = cache.current().await?;
        assert_eq!(stale, first);
        Ok(())
    }

    #[tokio::test]
    async fn cold_cache_surfaces_source_errors() -> Result<()> {
        let source = counting()?;
        source.fail.store(true, Ordering::Relaxed);
        let cache = KeySetCache::new(source);
        assert!(cache.current().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_kid_refresh_sees_rotation_and_respects_cooldown() -> Result<()> {
        let source = counting()?;
        let cache = KeySetCache::new(source.clone());
        cache.current().await?;

        let kid = source.manager.rotate().await?;
        assert!(cache.current().await?.find_by_kid(&kid).is_none());

        let refreshed = cache.refresh_for_unknown_kid(&kid).await?;
        assert!(refreshed.is_some_and(|jwks| jwks.find_by_kid(&kid).is_some()));

        // A second unknown kid within the cooldown does not hit the source.
        assert!(cache.refresh_for_unknown_kid("bogus").await?.is_none());
        assert_eq!(source.fetches.load(Ordering::Relaxed), 2);
        Ok(())
    }

    #[test]
    fn remote_url_joins_well_known_path() -> Result<()> {
        let remote = RemoteKeySet::new(&Url::parse("https://auth.example.com/")?)?;
        assert_eq!(
            remote.url().as_str(),
            "https://auth.example.com/.well-known/jwks.json"
        );
        Ok(())
    }
}
