//! Identity token handling
//!
//! Tokens are HS256-signed JWTs carrying the user id as `sub`. Expiry is
//! checked here rather than by `jsonwebtoken` so that a zero lifetime is
//! already expired (the library check is `exp < now` plus leeway).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::MIN_SECRET_LEN;
use crate::types::MarqueeError;

/// Payload stored in the token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id (hex ObjectId)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies identity tokens
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    /// Create a new token service
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Result<Self, MarqueeError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(MarqueeError::Config("JWT_SECRET is required".into()));
        }

        if secret.len() < MIN_SECRET_LEN {
            return Err(MarqueeError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        Ok(Self { secret, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token with the configured lifetime
    pub fn issue(&self, subject: &str) -> Result<IssuedToken, MarqueeError> {
        self.issue_with_ttl(subject, self.ttl)
    }

    pub fn issue_with_ttl(&self, subject: &str, ttl: Duration) -> Result<IssuedToken, MarqueeError> {
        self.issue_at(subject, ttl, Utc::now())
    }

    /// Issue a token as of `now`; identical inputs yield identical tokens
    pub fn issue_at(
        &self,
        subject: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, MarqueeError> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| MarqueeError::Internal(format!("Token lifetime out of range: {e}")))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| MarqueeError::Internal("Token lifetime out of range".into()))?;

        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| MarqueeError::Internal(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify and decode a token
    pub fn verify(&self, token: &str) -> Result<Claims, MarqueeError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, MarqueeError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| MarqueeError::TokenInvalid)?
        .claims;

        if now.timestamp() >= claims.exp {
            return Err(MarqueeError::TokenExpired);
        }

        Ok(claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
