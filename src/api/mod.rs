//! Authenticated request pipeline.
//!
//! `ApiClient` decorates outgoing calls with the session's bearer token,
//! refreshes proactively when the token is near expiry, and resolves
//! authentication failures (one refresh-and-retry cycle, then teardown).
//! Business-logic errors pass through normalized for page-level handling.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::{classify_unauthorized, ApiError, AuthError, RefreshError, UnauthorizedReason};
pub use transport::{ApiRequest, ApiResponse, AuthTransport, HttpTransport, ReqwestTransport};
