//! Refresh secrets.
//!
//! The clear secret is returned to the caller once; only its SHA-256 digest is
//! persisted. A fast hash is enough because the secret carries 256 bits of
//! entropy.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

pub const REFRESH_SECRET_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RefreshHash(Vec<u8>);

impl RefreshHash {
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Constant-time equality, for comparisons outside hashed lookups.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for RefreshHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshHash(..)")
    }
}

/// 32 random bytes, base64url without padding.
///
/// # Errors
///
/// Returns an error if the OS random source fails.
pub fn generate_refresh_secret() -> Result<SecretString> {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh secret")?;
    Ok(SecretString::from(Base64UrlUnpadded::encode_string(&bytes)))
}

#[must_use]
pub fn hash_refresh_secret(secret: &str) -> RefreshHash {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    RefreshHash(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn generate_refresh_secret_is_urlsafe_and_unique() -> Result<()> {
        let first = generate_refresh_secret()?;
        let second = generate_refresh_secret()?;
        assert_eq!(first.expose_secret().len(), 43);
        assert!(!first.expose_secret().contains(['+', '/', '=']));
        assert_ne!(first.expose_secret(), second.expose_secret());
        Ok(())
    }

    #[test]
    fn hash_is_deterministic_sha256() {
        let hash = hash_refresh_secret("secret");
        assert_eq!(hash.as_bytes().len(), 32);
        assert_eq!(hash, hash_refresh_secret("secret"));
        assert!(hash.ct_eq(&hash_refresh_secret("secret")));
        assert!(!hash.ct_eq(&hash_refresh_secret("secret2")));
    }

    #[test]
    fn debug_hides_digest() {
        assert_eq!(format!("{:?}", hash_refresh_secret("x")), "RefreshHash(..)");
    }
}
