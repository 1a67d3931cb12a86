use crate::token::jwt::Error;
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

pub const KTY_OKP: &str = "OKP";
pub const CRV_ED25519: &str = "Ed25519";
pub const ALG_EDDSA: &str = "EdDSA";

/// Public key set published to verifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    /// Raw 32-byte public key, base64url without padding.
    pub x: String,
}

impl Jwk {
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey, kid: impl Into<String>) -> Self {
        Self {
            kty: KTY_OKP.to_string(),
            crv: CRV_ED25519.to_string(),
            alg: Some(ALG_EDDSA.to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            x: Base64UrlUnpadded::encode_string(key.as_bytes()),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::KeyParse`] if this is not a well-formed Ed25519 public key.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, Error> {
        if self.kty != KTY_OKP || self.crv != CRV_ED25519 {
            return Err(Error::KeyParse);
        }
        if self.alg.as_deref().is_some_and(|alg| alg != ALG_EDDSA) {
            return Err(Error::KeyParse);
        }
        let bytes = Base64UrlUnpadded::decode_vec(&self.x).map_err(|_| Error::Base64)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::KeyParse)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| Error::KeyParse)
    }
}

/// Key id derived from the public key, so the same key always gets the same kid.
#[must_use]
pub fn kid_for(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    Base64UrlUnpadded::encode_string(&digest[..16])
}
