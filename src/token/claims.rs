use crate::{
    principal::{PrincipalId, Role},
    session::SessionId,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Access token claim set. New claims are added as optional fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct AccessClaims {
    pub sub: PrincipalId,
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    pub role: Role,
    #[serde(
        rename = "tenantId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tenant_id: Option<String>,
    /// Principal revocation counter as of issuance.
    pub ver: i64,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() -> anyhow::Result<()> {
        let claims = AccessClaims {
            sub: PrincipalId::new(),
            session_id: SessionId::new(),
            role: Role::User,
            tenant_id: None,
            ver: 3,
            iat: 1_700_000_000,
            exp: 1_700_000_900,
            iss: "tessera".to_string(),
        };
        let value = serde_json::to_value(&claims)?;
        let object = value.as_object().map(|o| {
            let mut keys: Vec<&str> = o.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys
        });
        assert_eq!(
            object,
            Some(vec!["exp", "iat", "iss", "role", "sessionId", "sub", "ver"])
        );

        let with_tenant = AccessClaims {
            tenant_id: Some("acme".to_string()),
            ..claims
        };
        assert_eq!(serde_json::to_value(&with_tenant)?["tenantId"], "acme");
        Ok(())
    }
}
