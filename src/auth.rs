use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token missing")]
    TokenMissing,
    #[error("invalid token")]
    InvalidToken,
}

/// Identity carried by the signed token issued at login. The signing secret
/// is shared with the HTTP auth service, so tokens verify locally without a
/// callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: u64,
}

/// Token supplied in a WebSocket upgrade's query string.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub fn verify(secret: &str, token: Option<&str>) -> Result<Claims, AuthError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::TokenMissing)?;

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs()
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("failed to sign test token")
    }

    #[test]
    fn accepts_a_valid_token() {
        let claims = Claims {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: Some("ada@example.com".to_string()),
            exp: now() + 3600,
        };
        let token = sign(&claims, SECRET);

        let verified = verify(SECRET, Some(&token)).expect("token should verify");
        assert_eq!(verified.id, "u1");
        assert_eq!(verified.username, "ada");
    }

    #[test]
    fn rejects_a_missing_token() {
        assert!(matches!(verify(SECRET, None), Err(AuthError::TokenMissing)));
        assert!(matches!(
            verify(SECRET, Some("")),
            Err(AuthError::TokenMissing)
        ));
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let claims = Claims {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: None,
            exp: now() + 3600,
        };
        let token = sign(&claims, "other-secret");

        assert!(matches!(
            verify(SECRET, Some(&token)),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn rejects_an_expired_token() {
        let claims = Claims {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: None,
            exp: now() - 3600,
        };
        let token = sign(&claims, SECRET);

        assert!(matches!(
            verify(SECRET, Some(&token)),
            Err(AuthError::InvalidToken)
        ));
    }
}
