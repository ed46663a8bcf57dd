//! Client-side credential storage.
//!
//! This module provides:
//! - `Storage`: a plain key/value pass-through trait with file, OS-keychain,
//!   and in-memory backends
//! - `CredentialStore`: the typed layout this crate persists on top of a
//!   `Storage` (tokens, expiry timestamp, username)
//!
//! Every mutation takes effect immediately; nothing here validates content.

pub mod credentials;
pub mod file;
pub mod keychain;
pub mod memory;

pub use credentials::CredentialStore;
pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;

use anyhow::Result;

/// Durable key/value storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Remove every entry this crate may have written.
    fn clear(&self) -> Result<()>;
}
