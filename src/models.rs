//! Wire payloads for the authentication endpoints and the stored credential.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::token;

/// Body of the login request.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token payload returned by both the login and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds at issuance.
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Credential held for an authenticated session.
///
/// Created on login, replaced wholesale on refresh, destroyed on logout or
/// any terminal refresh failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiration instant. Derived from the access token's own
    /// `exp` claim when the token decodes; the advertised `expires_in` is
    /// the fallback. This value is a cache, not the source of truth.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a token response, preferring the embedded
    /// `exp` claim over the advertised lifetime.
    pub fn from_response(response: &TokenResponse) -> Self {
        let expires_at = token::expiration_of(&response.access_token)
            .unwrap_or_else(|| Utc::now() + Duration::seconds(response.expires_in));
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at,
        }
    }
}
