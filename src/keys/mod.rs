pub mod cache;
pub mod jwks;
pub mod manager;

pub use cache::{KeySetCache, KeySetSource, RemoteKeySet};
pub use jwks::{Jwk, Jwks};
pub use manager::{ActiveKey, KeyManager, SigningKeyEntry};
