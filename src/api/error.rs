//! Error taxonomy for the session and request pipeline.

use reqwest::StatusCode;
use thiserror::Error;

/// Maximum length for error response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Normalized failure of a business API call.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session ended")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Truncate a response body to avoid carrying excessive data.
    /// The cut backs off to a char boundary; bodies are arbitrary text.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        )
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Login failure. Recoverable by user retry; never mutates stored state.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("network failure during login: {0}")]
    Network(String),

    #[error("malformed login response: {0}")]
    InvalidResponse(String),

    #[error("credential storage failed: {0}")]
    Storage(String),
}

/// Refresh failure. Always terminal for the current session.
///
/// `Clone` because concurrent refresh waiters all receive the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("network failure during refresh: {0}")]
    Network(String),

    #[error("refresh rejected by server: {0}")]
    ServerRejected(String),

    #[error("credential storage failed: {0}")]
    Storage(String),

    #[error("session was closed while the refresh was in flight")]
    Cancelled,
}

/// Classification of a 401 response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    TokenExpired,
    Other,
}

/// The single place that inspects unauthorized response bodies.
///
/// The backend reports expiry either through a machine-ish `reason`/`error`
/// field or as free text, so every matching rule lives here and the rest of
/// the crate only sees the resulting enum.
pub fn classify_unauthorized(body: &str) -> UnauthorizedReason {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["reason", "error", "message"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                if is_expired_marker(text) {
                    return UnauthorizedReason::TokenExpired;
                }
            }
        }
    }
    if is_expired_marker(body) {
        UnauthorizedReason::TokenExpired
    } else {
        UnauthorizedReason::Other
    }
}

fn is_expired_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower == "token_expired" || lower.contains("expired")
}
