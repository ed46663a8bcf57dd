//! Typed credential layout persisted on top of a `Storage` backend.
//!
//! Three logical string entries (access token, refresh token, RFC 3339
//! expiry) plus the weakly-bound username, all under a namespaced prefix so
//! they never collide with unrelated stored values.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::Storage;
use crate::models::Credential;

const ACCESS_TOKEN_KEY: &str = "jwt-session.access-token";
const REFRESH_TOKEN_KEY: &str = "jwt-session.refresh-token";
const EXPIRES_AT_KEY: &str = "jwt-session.expires-at";
const USERNAME_KEY: &str = "jwt-session.username";

/// Every key this crate writes, for backends that cannot enumerate.
pub(crate) const TRACKED_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    EXPIRES_AT_KEY,
    USERNAME_KEY,
];

#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist a credential wholesale.
    pub fn store_credential(&self, credential: &Credential) -> Result<()> {
        self.storage
            .set(ACCESS_TOKEN_KEY, &credential.access_token)?;
        self.storage
            .set(REFRESH_TOKEN_KEY, &credential.refresh_token)?;
        self.storage
            .set(EXPIRES_AT_KEY, &credential.expires_at.to_rfc3339())?;
        Ok(())
    }

    /// Load the stored credential. `None` when any of the three entries is
    /// missing; a credential is replaced wholesale, never partially.
    pub fn load_credential(&self) -> Result<Option<Credential>> {
        let (access_token, refresh_token, expires_at) = match (
            self.storage.get(ACCESS_TOKEN_KEY)?,
            self.storage.get(REFRESH_TOKEN_KEY)?,
            self.storage.get(EXPIRES_AT_KEY)?,
        ) {
            (Some(a), Some(r), Some(e)) => (a, r, e),
            _ => return Ok(None),
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .context("Failed to parse stored expiration timestamp")?
            .with_timezone(&Utc);
        Ok(Some(Credential {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.storage.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    /// Replace only the access token, for sliding-session renewal headers.
    /// The stored expiry is updated when the renewed token's own `exp` claim
    /// is readable, otherwise left as-is.
    pub fn renew_access_token(
        &self,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.storage.set(ACCESS_TOKEN_KEY, access_token)?;
        if let Some(expires_at) = expires_at {
            self.storage.set(EXPIRES_AT_KEY, &expires_at.to_rfc3339())?;
        }
        Ok(())
    }

    pub fn username(&self) -> Result<Option<String>> {
        self.storage.get(USERNAME_KEY)
    }

    pub fn set_username(&self, username: &str) -> Result<()> {
        self.storage.set(USERNAME_KEY, username)
    }

    /// Clear every entry the session touched.
    pub fn clear(&self) -> Result<()> {
        self.storage.clear()
    }
}
