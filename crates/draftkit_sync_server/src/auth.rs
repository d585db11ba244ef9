//! Authentication support for the sync server.
//!
//! This module provides token-based authentication using HMAC-SHA256.
//! Tokens carry an explicit expiry time.
//!
//! ## Token Format
//!
//! `{user_id}.{expiry_millis}.{signature}` where the signature is the
//! hex-encoded HMAC-SHA256 of `{user_id}.{expiry_millis}`.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates auth tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a new auth token for a user.
    pub fn create_token(&self, user_id: &str) -> String {
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
            + self.config.token_expiry.as_millis() as u64;

        let payload = format!("{}.{}", user_id, expiry);
        let signature = self.sign(payload.as_bytes());
        format!("{}.{}", payload, hex(&signature))
    }

    /// Validates a token and returns the user id it was issued for.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        // The user id may itself contain dots, split from the right.
        let mut parts = token.rsplitn(3, '.');
        let signature = parts
            .next()
            .ok_or_else(|| ServerError::Unauthorized("Malformed token".into()))?;
        let expiry_str = parts
            .next()
            .ok_or_else(|| ServerError::Unauthorized("Malformed token".into()))?;
        let user_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServerError::Unauthorized("Malformed token".into()))?;

        let payload = format!("{}.{}", user_id, expiry_str);
        let expected = hex(&self.sign(payload.as_bytes()));
        if signature != expected {
            return Err(ServerError::Unauthorized("Invalid signature".into()));
        }

        let expiry: u64 = expiry_str
            .parse()
            .map_err(|_| ServerError::Unauthorized("Malformed token".into()))?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if now > expiry {
            return Err(ServerError::Unauthorized("Token expired".into()));
        }

        Ok(user_id.to_string())
    }

    /// Signs data with HMAC-SHA256.
    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.config.secret).expect("HMAC can take key of any size");
        mac.update(data);
        let result = mac.finalize();
        result.into_bytes().into()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
