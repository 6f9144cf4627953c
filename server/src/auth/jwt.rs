use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::hub::UserId;

/// Session token lifetime, matching the admin panel's cookie expiry.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Session claims issued by the admin panel and carried in the `jwt_token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: UserId,
    pub email: String,
    /// admin, curator, headman or student
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Resolve the session signing key: the configured shared secret if any,
/// otherwise a 256-bit random key stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(
    configured: Option<&str>,
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(secret) = configured.filter(|s| !s.is_empty()) {
        tracing::info!("Using configured JWT signing key");
        return Ok(secret.as_bytes().to_vec());
    }

    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    std::fs::create_dir_all(data_dir)?;
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a session token for `user_id`.
pub fn issue_session_token(
    secret: &[u8],
    user_id: UserId,
    email: &str,
    role: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        email: email.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + SESSION_TTL_SECS,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate a session token and return its claims.
pub fn validate_session_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn issued_token_validates() {
        let token = issue_session_token(SECRET, 7, "a@example.com", "student").unwrap();
        let claims = validate_session_token(SECRET, &token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.role, "student");
        assert_eq!(claims.exp - claims.iat, SESSION_TTL_SECS);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_session_token(SECRET, 7, "a@example.com", "student").unwrap();
        assert!(validate_session_token(b"other", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: 7,
            email: "a@example.com".to_string(),
            role: "student".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap();
        let err = validate_session_token(SECRET, &token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }

    #[test]
    fn configured_secret_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let key = load_or_generate_jwt_secret(Some("shared"), data_dir).unwrap();
        assert_eq!(key, b"shared");
        assert!(!dir.path().join("jwt_secret").exists());
    }

    #[test]
    fn generated_secret_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let first = load_or_generate_jwt_secret(None, data_dir).unwrap();
        let second = load_or_generate_jwt_secret(None, data_dir).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }
}
