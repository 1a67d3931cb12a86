use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_MEMORY_KIB: u32 = 19_456;
pub const DEFAULT_ITERATIONS: u32 = 2;
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Argon2id password hashing with tunable cost.
///
/// Verification reads the cost parameters from the stored PHC string, so
/// raising the cost only affects hashes created afterwards.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// # Errors
    ///
    /// Returns an error if argon2 rejects the parameters.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn hash(&self, password: &SecretString) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    /// Constant-time check of `password` against a stored PHC string.
    /// A malformed stored hash never verifies.
    #[must_use]
    pub fn verify(&self, password: &SecretString, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        self.argon2()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }

    /// [`Self::hash`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash_blocking(&self, password: SecretString) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task failed")?
    }

    /// [`Self::verify`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error only if the blocking task panics.
    pub async fn verify_blocking(&self, password: SecretString, stored: String) -> Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .context("password verification task failed")
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::new(DEFAULT_MEMORY_KIB, DEFAULT_ITERATIONS, DEFAULT_PARALLELISM, None)
                .unwrap_or_default(),
        }
    }
}
