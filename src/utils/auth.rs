use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "timeStamp";
pub const TOKEN_HEADER: &str = "token";

/// Default validity window of a signed request, in milliseconds.
pub const DEFAULT_TOKEN_TIMEOUT_MS: i64 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub timestamp: i64,
    pub token: String,
}

/// Why a signed request was refused.
///
/// `MissingHeader` and `MalformedTimestamp` mean the request was not a
/// signed request at all; `Rejected` means it was, but the signature did not
/// match or the window had passed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing '{0}' header")]
    MissingHeader(&'static str),

    #[error("malformed timeStamp header: '{0}'")]
    MalformedTimestamp(String),

    #[error("token rejected")]
    Rejected,
}

impl AuthError {
    pub fn is_structural(&self) -> bool {
        !matches!(self, AuthError::Rejected)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Signs `action`, `payload` and `timestamp` with a shared secret.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret_key: String,
    timeout_ms: i64,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("secret_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl TokenAuthenticator {
    pub fn new(secret_key: impl Into<String>, timeout_ms: i64) -> Self {
        Self {
            secret_key: secret_key.into(),
            timeout_ms,
        }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    pub fn generate(&self, action: &str, payload: &str) -> SignedToken {
        self.generate_at(action, payload, now_ms())
    }

    pub fn generate_at(&self, action: &str, payload: &str, timestamp: i64) -> SignedToken {
        let token = hex::encode(self.mac(action, payload, timestamp).finalize().into_bytes());
        SignedToken { timestamp, token }
    }

    pub fn validate(&self, action: &str, payload: &str, timestamp: i64, token: &str) -> bool {
        self.validate_at(action, payload, timestamp, token, now_ms())
    }

    /// Timestamps ahead of `now` are accepted; only age is bounded.
    pub fn validate_at(
        &self,
        action: &str,
        payload: &str,
        timestamp: i64,
        token: &str,
        now: i64,
    ) -> bool {
        if now.saturating_sub(timestamp) > self.timeout_ms {
            return false;
        }

        let Ok(signature) = hex::decode(token) else {
            return false;
        };

        self.mac(action, payload, timestamp)
            .verify_slice(&signature)
            .is_ok()
    }

    /// Reads `timeStamp` and `token` from `headers` and validates them.
    pub fn verify_headers(
        &self,
        headers: &HeaderMap,
        action: &str,
        payload: &str,
    ) -> Result<(), AuthError> {
        let (timestamp, token) = signed_headers(headers)?;
        self.verify(&SignedToken { timestamp, token }, action, payload)
    }

    pub fn verify(&self, signed: &SignedToken, action: &str, payload: &str) -> Result<(), AuthError> {
        if self.validate(action, payload, signed.timestamp, &signed.token) {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }

    fn mac(&self, action: &str, payload: &str, timestamp: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(action.as_bytes());
        mac.update(b"\n");
        mac.update(payload.as_bytes());
        mac.update(b"\n");
        mac.update(timestamp.to_string().as_bytes());
        mac
    }
}

pub fn signed_headers(headers: &HeaderMap) -> Result<(i64, String), AuthError> {
    let raw_timestamp = headers
        .get(TIMESTAMP_HEADER)
        .ok_or(AuthError::MissingHeader(TIMESTAMP_HEADER))?;
    let raw_timestamp = raw_timestamp
        .to_str()
        .map_err(|_| AuthError::MalformedTimestamp(String::from_utf8_lossy(raw_timestamp.as_bytes()).into_owned()))?;
    let timestamp = raw_timestamp
        .trim()
        .parse::<i64>()
        .map_err(|_| AuthError::MalformedTimestamp(raw_timestamp.to_string()))?;

    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader(TOKEN_HEADER))?;

    Ok((timestamp, token.to_string()))
}
