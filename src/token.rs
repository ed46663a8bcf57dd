//! Unverified JWT payload inspection.
//!
//! Decodes the self-asserted claims of a token for expiry scheduling and
//! display. No signature verification happens here; enforcement is the
//! issuing server's job.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MalformedToken {
    #[error("token does not have three dot-separated segments")]
    Segments,
    #[error("token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Claims carried in a token payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Expiration time, seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    /// Subject, typically the username.
    #[serde(default)]
    pub sub: Option<String>,
    /// Authorization claims. Read for display convenience only.
    #[serde(default)]
    pub authorities: Vec<String>,
    /// Claims this crate does not model directly.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decode the payload segment of a JWT without verifying its signature.
pub fn decode(token: &str) -> Result<Claims, MalformedToken> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => return Err(MalformedToken::Segments),
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The absolute expiration instant embedded in the token, if any.
pub fn expiration_of(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode(token).ok()?.exp?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Time remaining before the token expires. `None` when the token is
/// unreadable or carries no `exp` claim.
pub fn time_to_expiry(token: &str) -> Option<Duration> {
    Some(expiration_of(token)? - Utc::now())
}

/// Whether the token's embedded expiry has passed.
///
/// Fail-closed: a token that cannot be decoded counts as expired.
pub fn is_expired(token: &str) -> bool {
    match time_to_expiry(token) {
        Some(remaining) => remaining <= Duration::zero(),
        None => true,
    }
}

/// Forge an unsigned token with the given payload for tests.
#[cfg(test)]
pub(crate) fn forge(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{}.{}.sig", header, body)
}
