//! Client configuration.
//!
//! Endpoint URIs, the renewal header name, and the refresh timing knobs.
//! Stored at `~/.config/jwt-session/config.json`; the endpoint URIs can be
//! overridden through the environment (a `.env` file is honored).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Directory name under the platform config dir.
const APP_NAME: &str = "jwt-session";

/// Config file name.
const CONFIG_FILE: &str = "config.json";

/// Minutes before expiry at which the proactive refresh timer fires.
const REFRESH_LEAD_MINUTES: i64 = 5;

/// Default near-expiry threshold for request-time refresh checks.
const EXPIRY_THRESHOLD_MINUTES: i64 = 10;

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Login endpoint: POST `{username, password}`.
    pub auth_server_uri: String,
    /// Refresh endpoint: GET with the refresh token as bearer.
    pub refresh_uri: String,
    /// Response header carrying a replacement access token (sliding sessions).
    pub renewal_header: String,
    pub refresh_lead_minutes: i64,
    pub expiry_threshold_minutes: i64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_server_uri: "http://localhost:8080/authenticate".to_string(),
            refresh_uri: "http://localhost:8080/refresh".to_string(),
            renewal_header: "x-renewed-token".to_string(),
            refresh_lead_minutes: REFRESH_LEAD_MINUTES,
            expiry_threshold_minutes: EXPIRY_THRESHOLD_MINUTES,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from disk (or defaults), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(uri) = std::env::var("JWT_SESSION_AUTH_URI") {
            self.auth_server_uri = uri;
        }
        if let Ok(uri) = std::env::var("JWT_SESSION_REFRESH_URI") {
            self.refresh_uri = uri;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::minutes(self.refresh_lead_minutes)
    }

    pub fn expiry_threshold(&self) -> Duration {
        Duration::minutes(self.expiry_threshold_minutes)
    }
}
