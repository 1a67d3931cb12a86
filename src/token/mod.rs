pub mod claims;
pub mod issuer;
pub mod jwt;
pub mod refresh;

pub use claims::AccessClaims;
pub use issuer::{AccessGrant, IssuedAccessToken, IssuedRefreshSecret, TokenConfig, TokenIssuer};
pub use refresh::{hash_refresh_secret, RefreshHash};
