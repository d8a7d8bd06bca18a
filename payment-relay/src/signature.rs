use crate::error::AuthError;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex `HMAC-SHA256(secret, message)`.
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature over `message`.
/// Non-hex input and wrong lengths are simply a mismatch.
fn matches_hex(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(message);
    mac.verify_slice(&provided).is_ok()
}

/// Case-insensitive header lookup; the configured name may be in any casing.
/// Non-ASCII bytes are kept (lossily) so a garbled value still counts as present.
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
        .map(|(_, v)| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// Authenticates processor webhooks: `HMAC-SHA256(webhook_secret, raw_body)`.
#[derive(Clone)]
pub struct BodyAuthenticator {
    secret: String,
}

impl BodyAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn authenticate(&self, body: &[u8], signature: Option<&str>) -> Result<(), AuthError> {
        let signature = match signature {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Err(AuthError::MissingSignature),
        };
        if matches_hex(&self.secret, body, signature) {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }
}

/// Width of the window a poll token stays valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TokenBucket {
    #[default]
    Hour,
    Day,
}

impl TokenBucket {
    /// The string the token is computed over, in UTC.
    pub fn label(&self, at: DateTime<Utc>) -> String {
        match self {
            TokenBucket::Hour => at.format("%Y-%m-%d-%H").to_string(),
            TokenBucket::Day => at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Authenticates the poll/ack endpoints with a token derived from a shared
/// secret and the current time bucket: `HMAC-SHA256(poll_secret, bucket)`.
/// Stateless; a token is replayable until its bucket rolls over.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: String,
    bucket: TokenBucket,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<String>, bucket: TokenBucket) -> Self {
        Self {
            secret: secret.into(),
            bucket,
        }
    }

    pub fn token_at(&self, at: DateTime<Utc>) -> String {
        hmac_sha256_hex(&self.secret, self.bucket.label(at).as_bytes())
    }

    pub fn current_token(&self) -> String {
        self.token_at(Utc::now())
    }

    pub fn authenticate_at(&self, token: Option<&str>, at: DateTime<Utc>) -> Result<(), AuthError> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err(AuthError::MissingToken),
        };
        let label = self.bucket.label(at);
        if matches_hex(&self.secret, label.as_bytes(), token) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.authenticate_at(token, Utc::now())
    }
}
