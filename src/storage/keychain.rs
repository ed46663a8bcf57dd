//! OS keychain storage backend via the `keyring` crate.

use anyhow::{Context, Result};
use keyring::Entry;

use super::credentials::TRACKED_KEYS;
use super::Storage;

const SERVICE_NAME: &str = "jwt-session";

/// Storage backed by the operating system keychain.
///
/// The keychain cannot enumerate entries, so `clear` removes the fixed set
/// of keys this crate writes.
pub struct KeyringStorage;

impl KeyringStorage {
    pub fn new() -> Self {
        Self
    }

    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read entry from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .context("Failed to store entry in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete entry from keychain"),
        }
    }

    fn clear(&self) -> Result<()> {
        for key in TRACKED_KEYS {
            self.remove(key)?;
        }
        Ok(())
    }
}
