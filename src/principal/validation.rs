//! Input policy applied at registration and login.

use crate::error::AuthError;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

/// Usernames compare case-insensitively, so they are stored lowercased.
#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[must_use]
pub fn valid_username(username_normalized: &str) -> bool {
    let len = username_normalized.chars().count();
    (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len)
        && username_normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[must_use]
pub fn valid_password(password: &SecretString) -> bool {
    let len = password.expose_secret().chars().count();
    (PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len)
}

/// Normalized `(username, email)` for a registration, or the first policy violation.
///
/// # Errors
///
/// Returns [`AuthError::InvalidInput`] naming the offending field.
pub fn registration(
    username: &str,
    email: &str,
    password: &SecretString,
) -> Result<(String, String), AuthError> {
    let username = normalize_username(username);
    if !valid_username(&username) {
        return Err(AuthError::InvalidInput(format!(
            "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters of letters, digits, '_', '.' or '-'"
        )));
    }

    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(AuthError::InvalidInput("invalid email address".to_string()));
    }

    if !valid_password(password) {
        return Err(AuthError::InvalidInput(format!(
            "password must be {PASSWORD_MIN_LEN}-{PASSWORD_MAX_LEN} characters"
        )));
    }

    Ok((username, email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn username_policy() {
        assert!(valid_username("alice"));
        assert!(valid_username("a.b-c_d"));
        assert!(!valid_username("al"));
        assert!(!valid_username(&"a".repeat(51)));
        assert!(!valid_username("alice smith"));
    }

    #[test]
    fn password_policy() {
        assert!(valid_password(&SecretString::from("Secret123!")));
        assert!(!valid_password(&SecretString::from("short")));
        assert!(!valid_password(&SecretString::from("x".repeat(129))));
    }

    #[test]
    fn registration_normalizes() -> anyhow::Result<()> {
        let (username, email) =
            registration(" Alice ", "Alice@X.com", &SecretString::from("Secret123!"))?;
        assert_eq!(username, "alice");
        assert_eq!(email, "alice@x.com");
        Ok(())
    }

    #[test]
    fn registration_rejects_bad_password() {
        let result = registration("alice", "alice@x.com", &SecretString::from("1234"));
        assert!(matches!(result, Err(AuthError::InvalidInput(_))));
    }
}
