use serde::{Deserialize, Serialize};

/// Claims carried by a verified access token.
///
/// `sub` is the identity label connections are grouped by; the rest is
/// issuance metadata kept for logging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject, the authenticated identity.
    pub sub: String,
    /// Expiry (seconds since epoch). Always present on accepted tokens.
    pub exp: i64,
    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued-at (seconds since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_full_payload() {
        let json = r#"{
            "sub": "user-1",
            "exp": 1900000000,
            "iss": "http://localhost/auth/v1",
            "iat": 1700000000,
            "aud": "authenticated",
            "role": "authenticated"
        }"#;
        let claims: IdentityClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.iat, Some(1_700_000_000));
    }

    #[test]
    fn deserialize_minimal_payload() {
        let json = r#"{"sub": "user-2", "exp": 1900000000}"#;
        let claims: IdentityClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub, "user-2");
        assert!(claims.iss.is_none());
        assert!(claims.iat.is_none());
    }

    #[test]
    fn missing_sub_fails() {
        let json = r#"{"exp": 1900000000}"#;
        assert!(serde_json::from_str::<IdentityClaims>(json).is_err());
    }

    #[test]
    fn serialize_skips_absent_metadata() {
        let claims = IdentityClaims {
            sub: "user-3".into(),
            exp: 1_900_000_000,
            iss: None,
            iat: None,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("iss").is_none());
        assert!(json.get("iat").is_none());
    }
}
