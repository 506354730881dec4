//! Token issuing and credential checks.

pub mod users;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::SecurityConfig;

pub use users::{MemoryUserStore, PgUserStore, UserRecord, UserStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Caller id (the auth user table's id column, as text)
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(sub: impl Into<String>, role: impl Into<String>, security: &SecurityConfig) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(security.jwt_expiry_hours as i64)).timestamp();

        Self {
            sub: sub.into(),
            role: role.into(),
            iss: security.jwt_issuer.clone(),
            iat: now.timestamp(),
            exp,
        }
    }

    /// Seconds until expiry
    pub fn expires_in(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),
}

pub fn generate_jwt(claims: &Claims, security: &SecurityConfig) -> Result<String, JwtError> {
    if security.jwt_secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(security.jwt_secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Verify signature, expiry and issuer
pub fn validate_jwt(token: &str, security: &SecurityConfig) -> Result<Claims, JwtError> {
    if security.jwt_secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(security.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.set_issuer(&[security.jwt_issuer.as_str()]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })
}

/// Compare a plaintext password with a stored bcrypt hash off the async runtime
pub async fn verify_password(password: String, hash: String) -> bool {
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            tracing::warn!("Stored password hash is not valid bcrypt: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}

/// SHA-256 hex digest used when API keys are stored hashed
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn security() -> SecurityConfig {
        AppConfig::for_tests().security
    }

    #[test]
    fn round_trips_claims() {
        let security = security();
        let claims = Claims::new("42", "EDITOR", &security);
        let token = generate_jwt(&claims, &security).unwrap();
        let decoded = validate_jwt(&token, &security).unwrap();
        assert_eq!(decoded, claims);
        assert!(decoded.expires_in() > 0);
    }

    #[test]
    fn rejects_expired_tokens() {
        let security = security();
        let mut claims = Claims::new("1", "USER", &security);
        claims.iat -= 7200;
        claims.exp = Utc::now().timestamp() - 3600;
        let token = generate_jwt(&claims, &security).unwrap();
        assert!(matches!(validate_jwt(&token, &security), Err(JwtError::Expired)));
    }

    #[test]
    fn rejects_foreign_signatures_and_issuers() {
        let security = security();
        let token = generate_jwt(&Claims::new("1", "USER", &security), &security).unwrap();

        let mut other_secret = security.clone();
        other_secret.jwt_secret = "another-secret".to_string();
        assert!(matches!(validate_jwt(&token, &other_secret), Err(JwtError::Invalid(_))));

        let mut other_issuer = security.clone();
        other_issuer.jwt_issuer = "someone-else".to_string();
        assert!(matches!(validate_jwt(&token, &other_issuer), Err(JwtError::Invalid(_))));

        assert!(matches!(validate_jwt("garbage", &security), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn empty_secret_is_refused() {
        let mut security = security();
        security.jwt_secret.clear();
        let claims = Claims::new("1", "USER", &security);
        assert!(matches!(generate_jwt(&claims, &security), Err(JwtError::InvalidSecret)));
        assert!(matches!(validate_jwt("x", &security), Err(JwtError::InvalidSecret)));
    }

    #[tokio::test]
    async fn verifies_bcrypt_hashes() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        assert!(verify_password("hunter2".to_string(), hash.clone()).await);
        assert!(!verify_password("wrong".to_string(), hash).await);
        assert!(!verify_password("x".to_string(), "not-a-hash".to_string()).await);
    }

    #[test]
    fn api_key_hash_is_sha256_hex() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
