//! Accounts: password hashing, session tokens and the bearer extractor

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handlers::ApiError;
use crate::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Checks applied to a registration before anything is hashed or stored.
/// Returns the trimmed username.
pub fn validate_registration<'a>(
    username: &'a str,
    password: &str,
    password_confirm: &str,
) -> Result<&'a str, &'static str> {
    let username = username.trim();
    if username.is_empty() || password.trim().is_empty() || password_confirm.trim().is_empty() {
        return Err("All fields are required");
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters");
    }
    if password != password_confirm {
        return Err("Passwords do not match");
    }
    Ok(username)
}

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and checks HS256 session tokens
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Issue a token for `user_id`, returning it with its expiry
    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
    ) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok((token, expires_at))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);
        decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }
}

/// Authenticated caller, taken from `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

fn unauthorized(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::UNAUTHORIZED,
        message: message.to_string(),
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| unauthorized("Authentication required"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized("Invalid authorization header"))?;

        let claims = state.sessions.verify(token).map_err(|e| {
            warn!("Rejected session token for {}: {}", parts.uri, e);
            unauthorized("Invalid or expired session")
        })?;

        let id = claims
            .sub
            .parse()
            .map_err(|_| unauthorized("Invalid or expired session"))?;

        debug!("Authenticated user {} ({})", id, claims.username);

        Ok(AuthUser {
            id,
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn test_validate_registration() {
        assert_eq!(
            validate_registration("  alice ", "password1", "password1"),
            Ok("alice")
        );
        assert_eq!(
            validate_registration("   ", "password1", "password1"),
            Err("All fields are required")
        );
        assert_eq!(
            validate_registration("alice", "short", "short"),
            Err("Password must be at least 8 characters")
        );
        assert_eq!(
            validate_registration("alice", "password1", "password2"),
            Err("Passwords do not match")
        );
    }

    #[test]
    fn test_session_token_roundtrip() {
        let keys = SessionKeys::new(SECRET, 60);
        let (token, expires_at) = keys.issue(42, "alice").unwrap();
        assert!(expires_at > Utc::now());

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn test_session_token_rejects_other_key_and_expiry() {
        let keys = SessionKeys::new(SECRET, 60);
        let (token, _) = keys.issue(1, "alice").unwrap();

        let other = SessionKeys::new("ffffffffffffffffffffffffffffffff", 60);
        assert!(other.verify(&token).is_err());

        // Far enough in the past to clear the default leeway
        let expired = SessionKeys::new(SECRET, -10);
        let (token, _) = expired.issue(1, "alice").unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
