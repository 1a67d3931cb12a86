//! Compact JWS encoding of access tokens (`EdDSA` over Ed25519).

use super::claims::AccessClaims;
use crate::{error::AuthError, keys::jwks::{Jwks, ALG_EDDSA}};
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    fn eddsa(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_EDDSA.to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse public key")]
    KeyParse,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
}

impl From<Error> for AuthError {
    fn from(err: Error) -> Self {
        match err {
            Error::Expired => Self::TokenExpired,
            _ => Self::TokenInvalid,
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Create an `EdDSA` signed access token.
///
/// # Errors
///
/// Returns an error if the header or claims cannot be encoded.
pub fn sign_eddsa(
    signing_key: &SigningKey,
    kid: impl Into<String>,
    claims: &AccessClaims,
) -> Result<String, Error> {
    let header = TokenHeader::eddsa(kid);
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
    let signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());
    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an access token against `jwks` and return its claims.
///
/// Revocation is not checked here; see [`crate::gateway`].
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the `kid` is not in `jwks`,
/// - the signature is invalid,
/// - the issuer does not match or `exp` has passed.
pub fn verify_eddsa(
    token: &str,
    jwks: &Jwks,
    expected_issuer: &str,
    now_unix_seconds: i64,
) -> Result<AccessClaims, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_EDDSA {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let jwk = jwks
        .find_by_kid(&header.kid)
        .ok_or_else(|| Error::UnknownKid(header.kid.clone()))?;
    let verifying_key = jwk.to_verifying_key()?;

    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify_strict(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: AccessClaims = b64d_json(claims_b64)?;
    if claims.iss != expected_issuer {
        return Err(Error::InvalidIssuer);
    }
    if claims.exp <= now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}
