//! Bearer token claim decoding.
//!
//! The client never holds the server's signing key, so tokens are decoded
//! without signature verification. The claims are only used to decide
//! whether a stored access token is still worth sending and to show who
//! is logged in; the server remains the authority on validity.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default leeway in seconds for clock skew tolerance
pub const DEFAULT_LEEWAY_SECS: i64 = 30;

/// Error type for JWT operations.
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to decode token: {0}")]
    DecodingError(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

/// Claims carried by the backend's access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// JWT ID
    #[serde(default)]
    pub jti: Option<String>,
    /// "access" or "refresh"
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Claims {
    /// Expiry as a UTC instant.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// Whether the token is expired at `now`, allowing `leeway_secs` of skew.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        self.exp + leeway_secs <= now.timestamp()
    }

    pub fn is_access(&self) -> bool {
        self.token_type.as_deref().map_or(true, |t| t == "access")
    }
}

/// Decodes a token's claims without verifying its signature or expiry.
pub fn decode_claims(token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data =
        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::Base64(_) => JwtError::InvalidToken,
                _ => JwtError::DecodingError(e.to_string()),
            }
        })?;

    Ok(token_data.claims)
}

/// Decodes a token and rejects it if it has expired.
pub fn decode_unexpired(token: &str, now: DateTime<Utc>) -> Result<Claims, JwtError> {
    let claims = decode_claims(token)?;
    if claims.is_expired_at(now, DEFAULT_LEEWAY_SECS) {
        return Err(JwtError::TokenExpired);
    }
    Ok(claims)
}
