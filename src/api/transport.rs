//! Transport seams between the session/interceptor logic and reqwest.
//!
//! `AuthTransport` talks to the login and refresh endpoints; `HttpTransport`
//! executes business requests. Both have reqwest-backed implementations here
//! and can be substituted in tests.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use tracing::debug;

use super::error::{ApiError, AuthError, RefreshError};
use crate::config::Config;
use crate::models::{LoginRequest, TokenResponse};

/// An outgoing API request, before token attachment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    /// Attach a bearer token, replacing any previous one.
    pub(crate) fn bearer(self, token: &str) -> Self {
        self.with_header(header::AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }
}

/// A completed HTTP exchange, success or failure, with enough carried for
/// the error interceptor to act on. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Executes business requests. Transport-level failures (no connectivity,
/// no status at all) surface as `ApiError::Network`; any HTTP status comes
/// back as a plain `ApiResponse`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Talks to the login and refresh endpoints.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: Config,
}

impl ReqwestTransport {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn collect(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        debug!(method = %request.method, url = %request.url, "dispatching request");

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::collect(response).await
    }
}

#[async_trait]
impl AuthTransport for ReqwestTransport {
    async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let response = self
            .client
            .post(&self.config.auth_server_uri)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::InvalidCredentials(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let response = self
            .client
            .get(&self.config.refresh_uri)
            .bearer_auth(refresh_token)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::ServerRejected(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RefreshError::ServerRejected(format!("unparseable payload: {}", e)))
    }
}
