//! JWT session lifecycle management for REST API clients.
//!
//! This crate owns the parts of a client that outlive any single request:
//! credential storage, unverified token inspection, the login/refresh/logout
//! state machine with single-flight refresh coordination, and an HTTP
//! pipeline that attaches tokens, refreshes them proactively, and performs
//! one refresh-and-retry cycle on expired-token failures.
//!
//! ```no_run
//! use std::sync::Arc;
//! use jwt_session::{ApiClient, Config, CredentialStore, FileStorage, SessionService};
//! use jwt_session::api::ReqwestTransport;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = CredentialStore::new(Arc::new(FileStorage::open_default()?));
//! let transport = Arc::new(ReqwestTransport::new(config.clone())?);
//! let session = SessionService::new(store, transport, config.clone());
//!
//! session.login("alice", "pw").await?;
//!
//! let client = ApiClient::new(session.clone(), config)?;
//! let employees: serde_json::Value = client.get("https://api.example.com/employees").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod models;
pub mod session;
pub mod storage;
pub mod token;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, AuthError, RefreshError};
pub use config::Config;
pub use models::{Credential, TokenResponse};
pub use session::{NavTarget, SessionEvent, SessionService, SessionStatus};
pub use storage::{CredentialStore, FileStorage, KeyringStorage, MemoryStorage, Storage};
pub use token::{Claims, MalformedToken};
