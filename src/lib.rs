//! # Tessera
//!
//! Session and token lifecycle for an identity service.
//!
//! A login opens a server-side **session** and hands the client two
//! credentials:
//!
//! - a short-lived **access token**, a compact JWS signed with Ed25519 that
//!   any service holding the published key set can verify offline, and
//! - a long-lived opaque **refresh secret**, stored only as a SHA-256 hash and
//!   rotated on every use.
//!
//! Revocation works at three levels:
//!
//! 1. **Session**: logout marks one session revoked; its refresh secret stops
//!    working at once, outstanding access tokens age out within one TTL unless
//!    the verifier asks for the live session check.
//! 2. **Principal**: every principal carries a revocation counter that is
//!    embedded in each access token. Bumping it invalidates every token ever
//!    issued for that principal on the next verification.
//! 3. **Reuse**: presenting a refresh secret that was already rotated away is
//!    treated as theft and, by default, revokes the session it belonged to.
//!
//! ## Storage
//!
//! Stores sit behind the [`principal::PrincipalStore`] and
//! [`session::SessionStore`] traits. In-memory implementations back tests and
//! single-node development; [`postgres`] holds the `sqlx` implementations. The
//! schema lives in `sql/schema.sql`.

pub mod api;
pub mod cli;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod lifecycle;
pub mod postgres;
pub mod principal;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
