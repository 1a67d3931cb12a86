//! Signing key ring.
//!
//! Exactly one key signs at a time. Rotated and retired keys stay in the
//! published set so tokens signed before a rotation keep verifying until the
//! key is purged.

use super::jwks::{kid_for, Jwk, Jwks, ALG_EDDSA};
use anyhow::{anyhow, bail, Context, Result};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;

/// The key used for new signatures.
#[derive(Clone)]
pub struct ActiveKey {
    pub kid: String,
    pub alg: &'static str,
    pub signing_key: SigningKey,
}

impl fmt::Debug for ActiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SigningKeyEntry {
    kid: String,
    signing_key: SigningKey,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
}

impl SigningKeyEntry {
    fn new(signing_key: SigningKey) -> Self {
        Self {
            kid: kid_for(&signing_key.verifying_key()),
            signing_key,
            created_at: Utc::now(),
            rotated_at: None,
            retired_at: None,
        }
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rotated_at.is_none() && self.retired_at.is_none()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn rotated_at(&self) -> Option<DateTime<Utc>> {
        self.rotated_at
    }

    #[must_use]
    pub fn retired_at(&self) -> Option<DateTime<Utc>> {
        self.retired_at
    }

    fn to_jwk(&self) -> Jwk {
        Jwk::from_verifying_key(&self.verifying_key(), self.kid.clone())
    }
}

impl fmt::Debug for SigningKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyEntry")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .field("rotated_at", &self.rotated_at)
            .field("retired_at", &self.retired_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct KeyManager {
    ring: RwLock<Vec<SigningKeyEntry>>,
}

impl KeyManager {
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        let entry = SigningKeyEntry::new(signing_key);
        info!(kid = entry.kid(), "signing key loaded");
        Self {
            ring: RwLock::new(vec![entry]),
        }
    }

    /// Key manager with a freshly generated active key.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self> {
        Ok(Self::new(generate_signing_key()?))
    }

    /// Key manager whose active key comes from a base64 (standard or url-safe) 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed is not valid base64 or not 32 bytes long.
    pub fn from_seed(seed: &SecretString) -> Result<Self> {
        let raw = seed.expose_secret().trim();
        let bytes = Base64::decode_vec(raw)
            .or_else(|_| Base64UrlUnpadded::decode_vec(raw))
            .map_err(|_| anyhow!("signing key seed is not valid base64"))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("signing key seed must be 32 bytes"))?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    /// # Errors
    ///
    /// Returns an error if the ring has no active key.
    pub async fn active_key(&self) -> Result<ActiveKey> {
        let ring = self.ring.read().await;
        let entry = ring
            .iter()
            .find(|entry| entry.is_active())
            .context("no active signing key")?;
        Ok(ActiveKey {
            kid: entry.kid.clone(),
            alg: ALG_EDDSA,
            signing_key: entry.signing_key.clone(),
        })
    }

    /// Every key not yet purged, active first.
    pub async fn public_key_set(&self) -> Jwks {
        let ring = self.ring.read().await;
        let mut keys: Vec<&SigningKeyEntry> = ring.iter().collect();
        keys.sort_by_key(|entry| !entry.is_active());
        Jwks {
            keys: keys.into_iter().map(SigningKeyEntry::to_jwk).collect(),
        }
    }

    pub async fn entries(&self) -> Vec<SigningKeyEntry> {
        self.ring.read().await.clone()
    }

    /// Generates and activates a new key; the previous active key stays published.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source fails.
    pub async fn rotate(&self) -> Result<String> {
        let entry = SigningKeyEntry::new(generate_signing_key()?);
        let kid = entry.kid.clone();
        let now = Utc::now();

        let mut ring = self.ring.write().await;
        for previous in ring.iter_mut().filter(|entry| entry.is_active()) {
            previous.rotated_at = Some(now);
            info!(kid = previous.kid(), "signing key rotated out");
        }
        ring.push(entry);
        info!(kid = kid.as_str(), "signing key activated");

        Ok(kid)
    }

    /// Marks an inactive key retired. Returns false if the kid is unknown or already retired.
    ///
    /// # Errors
    ///
    /// Returns an error if `kid` is the active key.
    pub async fn retire(&self, kid: &str) -> Result<bool> {
        let mut ring = self.ring.write().await;
        let Some(entry) = ring.iter_mut().find(|entry| entry.kid == kid) else {
            return Ok(false);
        };
        if entry.is_active() {
            bail!("the active signing key cannot be retired");
        }
        if entry.retired_at.is_some() {
            return Ok(false);
        }
        entry.retired_at = Some(Utc::now());
        info!(kid, "signing key retired");
        Ok(true)
    }

    /// Drops retired keys whose retirement predates `older_than`.
    pub async fn purge_retired(&self, older_than: DateTime<Utc>) -> usize {
        let mut ring = self.ring.write().await;
        let before = ring.len();
        ring.retain(|entry| entry.retired_at.map_or(true, |at| at >= older_than));
        let purged = before - ring.len();
        if purged > 0 {
            info!(purged, "retired signing keys purged");
        }
        purged
    }
}

fn generate_signing_key() -> Result<SigningKey> {
    let mut seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut seed)
        .context("failed to generate signing key")?;
    Ok(SigningKey::from_bytes(&seed))
}
