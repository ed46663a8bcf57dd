//! Authenticated API client: the request and error interceptors.
//!
//! Every business request is decorated with the stored access token. Tokens
//! about to lapse are refreshed before dispatch; an expired-token 401 gets
//! exactly one refresh-and-retry cycle; terminal auth failures end the
//! session and announce a navigation target.

use std::sync::Arc;

use anyhow::Result;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{classify_unauthorized, ApiError, UnauthorizedReason};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
use crate::config::Config;
use crate::session::{NavTarget, SessionEvent, SessionService};
use crate::token;

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: SessionService,
    config: Config,
}

impl ApiClient {
    pub fn new(session: SessionService, config: Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.clone())?);
        Ok(Self::with_transport(session, config, transport))
    }

    pub fn with_transport(
        session: SessionService,
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            session,
            config,
        }
    }

    /// Send a request through the interceptor pipeline.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        // The auth endpoints themselves are never intercepted; refreshing a
        // refresh call would recurse forever.
        if self.is_auth_endpoint(&request.url) {
            return self.transport.execute(request).await;
        }

        let access_token = self.session.credentials().access_token().ok().flatten();
        let username = self.session.credentials().username().ok().flatten();
        let (Some(access_token), Some(_)) = (access_token, username) else {
            debug!(url = %request.url, "no session, passing request through unmodified");
            return self.transport.execute(request).await;
        };

        let access_token = if self.session.will_expire_soon() {
            match self.session.refresh().await {
                Ok(credential) => credential.access_token,
                Err(e) => {
                    // A present-but-stale token still gets one real attempt;
                    // terminal handling belongs to the error path below.
                    warn!(error = %e, "pre-request refresh failed, sending with current token");
                    access_token
                }
            }
        } else {
            access_token
        };

        let response = self
            .transport
            .execute(request.clone().bearer(&access_token))
            .await?;
        if response.status.is_success() {
            self.persist_renewal(&response);
            return Ok(response);
        }
        self.intercept_failure(request, response).await
    }

    /// The error interceptor: one refresh-and-retry cycle for expired-token
    /// 401s, navigation for terminal outcomes, pass-through otherwise.
    async fn intercept_failure(
        &self,
        request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, ApiError> {
        let status = response.status;

        if status == StatusCode::FORBIDDEN {
            info!(url = %request.url, "forbidden, session state left untouched");
            self.session
                .emit(SessionEvent::Navigate(NavTarget::Forbidden));
            return Err(ApiError::from_status(status, &response.body));
        }

        if status == StatusCode::UNAUTHORIZED {
            let expired = classify_unauthorized(&response.body) == UnauthorizedReason::TokenExpired;
            let has_refresh_token = self
                .session
                .credentials()
                .refresh_token()
                .ok()
                .flatten()
                .is_some();

            if expired && has_refresh_token {
                match self.session.refresh().await {
                    Ok(credential) => {
                        debug!(url = %request.url, "retrying once with refreshed token");
                        let retried = self
                            .transport
                            .execute(request.bearer(&credential.access_token))
                            .await?;
                        if retried.status.is_success() {
                            self.persist_renewal(&retried);
                            return Ok(retried);
                        }
                        // Exactly one retry per originally-failed request; a
                        // second failure is surfaced as-is.
                        return Err(ApiError::from_status(retried.status, &retried.body));
                    }
                    Err(e) => {
                        // The failed refresh already tore the session down.
                        warn!(error = %e, "refresh-and-retry failed, session ended");
                        self.session
                            .emit(SessionEvent::Navigate(NavTarget::Login { expired: true }));
                        return Err(ApiError::Unauthorized);
                    }
                }
            }

            info!(url = %request.url, expired, "unauthorized, ending session");
            self.session.logout();
            self.session
                .emit(SessionEvent::Navigate(NavTarget::Login { expired }));
            return Err(ApiError::Unauthorized);
        }

        Err(ApiError::from_status(status, &response.body))
    }

    /// Sliding-expiration support: a successful response may carry a
    /// replacement access token in the renewal header.
    fn persist_renewal(&self, response: &ApiResponse) {
        let Some(renewed) = response.header(&self.config.renewal_header) else {
            return;
        };
        debug!("persisting renewed access token from response header");
        if let Err(e) = self
            .session
            .credentials()
            .renew_access_token(renewed, token::expiration_of(renewed))
        {
            warn!(error = %e, "failed to persist renewed token");
        }
    }

    fn is_auth_endpoint(&self, url: &str) -> bool {
        url.starts_with(&self.config.auth_server_uri) || url.starts_with(&self.config.refresh_uri)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(url)).await?.json()
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("unserializable request body: {e}")))?;
        self.send(ApiRequest::post(url, body)).await?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::{AuthError, RefreshError};
    use crate::api::transport::AuthTransport;
    use crate::models::{Credential, TokenResponse};
    use crate::session::SessionEvent;
    use crate::storage::{CredentialStore, MemoryStorage};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// Scripted business-call transport that records every request it sees.
    #[derive(Default)]
    struct MockHttp {
        responses: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl MockHttp {
        fn push(&self, status: u16, body: &str) {
            self.push_with_headers(status, body, &[]);
        }

        fn push_with_headers(&self, status: u16, body: &str, headers: &[(&str, &str)]) {
            let headers: HashMap<String, String> = headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect();
            self.responses.lock().unwrap().push_back(Ok(ApiResponse {
                status: StatusCode::from_u16(status).unwrap(),
                headers,
                body: body.to_string(),
            }));
        }

        fn push_network_error(&self) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(ApiError::Network("connection refused".into())));
        }

        fn seen(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn authorization_of(request: &ApiRequest) -> Option<String> {
            request.headers.get("authorization").cloned()
        }
    }

    #[async_trait]
    impl HttpTransport for MockHttp {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request")
        }
    }

    struct MockAuth {
        refresh_results: Mutex<VecDeque<Result<TokenResponse, RefreshError>>>,
        refresh_delay: Option<StdDuration>,
        refresh_calls: AtomicUsize,
    }

    impl MockAuth {
        fn new() -> Self {
            Self {
                refresh_results: Mutex::new(VecDeque::new()),
                refresh_delay: None,
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn with_refresh(self, result: Result<TokenResponse, RefreshError>) -> Self {
            self.refresh_results.lock().unwrap().push_back(result);
            self
        }

        fn with_refresh_delay(mut self, delay: StdDuration) -> Self {
            self.refresh_delay = Some(delay);
            self
        }

        fn refresh_count(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthTransport for MockAuth {
        async fn login(&self, _: &str, _: &str) -> Result<TokenResponse, AuthError> {
            panic!("unexpected login call")
        }

        async fn refresh(&self, _: &str) -> Result<TokenResponse, RefreshError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.refresh_delay {
                tokio::time::sleep(delay).await;
            }
            self.refresh_results
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected refresh call")
        }
    }

    fn jwt_expiring_in(seconds: i64) -> String {
        crate::token::forge(json!({ "sub": "alice", "exp": Utc::now().timestamp() + seconds }))
    }

    fn fresh_response(access_token: &str) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: "R2".to_string(),
            expires_in: 3600,
            token_type: Some("Bearer".to_string()),
        }
    }

    struct Fixture {
        client: ApiClient,
        http: Arc<MockHttp>,
        auth: Arc<MockAuth>,
        session: SessionService,
    }

    fn fixture(auth: MockAuth) -> Fixture {
        let http = Arc::new(MockHttp::default());
        let auth = Arc::new(auth);
        let session = SessionService::new(
            CredentialStore::new(Arc::new(MemoryStorage::new())),
            Arc::clone(&auth) as Arc<dyn AuthTransport>,
            Config::default(),
        );
        let client = ApiClient::with_transport(
            session.clone(),
            Config::default(),
            Arc::clone(&http) as Arc<dyn HttpTransport>,
        );
        Fixture {
            client,
            http,
            auth,
            session,
        }
    }

    fn seed(fixture: &Fixture, access_token: &str) {
        fixture
            .session
            .credentials()
            .store_credential(&Credential {
                access_token: access_token.to_string(),
                refresh_token: "R1".to_string(),
                expires_at: crate::token::expiration_of(access_token)
                    .unwrap_or_else(|| Utc::now() + Duration::hours(1)),
            })
            .unwrap();
        fixture.session.credentials().set_username("alice").unwrap();
    }

    fn capture_events(session: &SessionService) -> Arc<Mutex<Vec<SessionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.on_event(Box::new(move |event| sink.lock().unwrap().push(event)));
        events
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let fx = fixture(MockAuth::new());
        let token = jwt_expiring_in(3600);
        seed(&fx, &token);
        fx.http.push(200, "{}");

        fx.client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await
            .unwrap();

        let seen = fx.http.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            MockHttp::authorization_of(&seen[0]),
            Some(format!("Bearer {}", token))
        );
        assert_eq!(fx.auth.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_request_passes_through_unmodified() {
        let fx = fixture(MockAuth::new());
        fx.http.push(200, "{}");

        fx.client
            .send(ApiRequest::get("https://api.example.com/public"))
            .await
            .unwrap();

        let seen = fx.http.seen();
        assert_eq!(MockHttp::authorization_of(&seen[0]), None);
    }

    #[tokio::test]
    async fn test_auth_endpoints_are_never_intercepted() {
        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(30));
        fx.http.push(200, "{}");

        let refresh_uri = Config::default().refresh_uri;
        fx.client.send(ApiRequest::get(&refresh_uri)).await.unwrap();

        // Even with a near-expiry credential stored: no bearer, no refresh.
        let seen = fx.http.seen();
        assert_eq!(MockHttp::authorization_of(&seen[0]), None);
        assert_eq!(fx.auth.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_refreshes_before_dispatch() {
        let fresh = jwt_expiring_in(3600);
        let fx = fixture(MockAuth::new().with_refresh(Ok(fresh_response(&fresh))));
        // Five minutes left, inside the 10-minute threshold.
        seed(&fx, &jwt_expiring_in(300));
        fx.http.push(200, "{}");

        fx.client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await
            .unwrap();

        assert_eq!(fx.auth.refresh_count(), 1);
        let seen = fx.http.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            MockHttp::authorization_of(&seen[0]),
            Some(format!("Bearer {}", fresh))
        );
    }

    #[tokio::test]
    async fn test_failed_proactive_refresh_still_sends_old_token() {
        let fx = fixture(
            MockAuth::new().with_refresh(Err(RefreshError::Network("unreachable".into()))),
        );
        let stale = jwt_expiring_in(300);
        seed(&fx, &stale);
        fx.http.push(200, "{}");

        fx.client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await
            .unwrap();

        let seen = fx.http.seen();
        assert_eq!(
            MockHttp::authorization_of(&seen[0]),
            Some(format!("Bearer {}", stale))
        );
    }

    #[tokio::test]
    async fn test_expired_401_refreshes_and_retries_once() {
        let fresh = jwt_expiring_in(3600);
        let fx = fixture(MockAuth::new().with_refresh(Ok(fresh_response(&fresh))));
        seed(&fx, &jwt_expiring_in(3600));
        fx.http.push(401, r#"{"message": "Token expired"}"#);
        fx.http.push(200, r#"{"result": "ok"}"#);

        let response = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await
            .unwrap();

        // The caller observes the retried result, not the 401.
        assert_eq!(response.body, r#"{"result": "ok"}"#);
        assert_eq!(fx.auth.refresh_count(), 1);

        let seen = fx.http.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            MockHttp::authorization_of(&seen[1]),
            Some(format!("Bearer {}", fresh))
        );
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced_without_another_refresh() {
        let fresh = jwt_expiring_in(3600);
        let fx = fixture(MockAuth::new().with_refresh(Ok(fresh_response(&fresh))));
        seed(&fx, &jwt_expiring_in(3600));
        fx.http.push(401, r#"{"message": "Token expired"}"#);
        fx.http.push(401, r#"{"message": "Token expired"}"#);

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(fx.auth.refresh_count(), 1);
        assert_eq!(fx.http.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_401_with_failing_refresh_redirects_to_login_expired() {
        let fx = fixture(
            MockAuth::new().with_refresh(Err(RefreshError::ServerRejected("HTTP 401".into()))),
        );
        seed(&fx, &jwt_expiring_in(3600));
        let events = capture_events(&fx.session);
        fx.http.push(401, "JWT token has expired");

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert!(fx
            .session
            .credentials()
            .load_credential()
            .unwrap()
            .is_none());
        assert!(events
            .lock()
            .unwrap()
            .contains(&SessionEvent::Navigate(NavTarget::Login { expired: true })));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_failing_refresh() {
        let fx = fixture(
            MockAuth::new()
                .with_refresh(Err(RefreshError::ServerRejected("HTTP 401".into())))
                .with_refresh_delay(StdDuration::from_millis(100)),
        );
        seed(&fx, &jwt_expiring_in(3600));
        let events = capture_events(&fx.session);
        for _ in 0..3 {
            fx.http.push(401, "JWT token has expired");
        }

        let (r1, r2, r3) = tokio::join!(
            fx.client.send(ApiRequest::get("https://api.example.com/employees")),
            fx.client.send(ApiRequest::get("https://api.example.com/departments")),
            fx.client.send(ApiRequest::get("https://api.example.com/offices")),
        );

        // All three callers fail; the single shared refresh decided it.
        for result in [r1, r2, r3] {
            assert!(matches!(result, Err(ApiError::Unauthorized)));
        }
        assert_eq!(fx.auth.refresh_count(), 1);
        // Three original dispatches, no retries.
        assert_eq!(fx.http.seen().len(), 3);
        assert!(fx
            .session
            .credentials()
            .load_credential()
            .unwrap()
            .is_none());
        let events = events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::Navigate(NavTarget::Login { expired: true }))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_other_401_logs_out_without_refresh() {
        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(3600));
        let events = capture_events(&fx.session);
        fx.http.push(401, r#"{"message": "Bad credentials"}"#);

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(fx.auth.refresh_count(), 0);
        assert!(fx.session.is_expired());
        assert!(events
            .lock()
            .unwrap()
            .contains(&SessionEvent::Navigate(NavTarget::Login { expired: false })));
    }

    #[tokio::test]
    async fn test_403_navigates_to_forbidden_and_keeps_session() {
        let fx = fixture(MockAuth::new());
        let token = jwt_expiring_in(3600);
        seed(&fx, &token);
        let events = capture_events(&fx.session);
        fx.http.push(403, "no access to this resource");

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/admin"))
            .await;

        assert!(matches!(result, Err(ApiError::AccessDenied(_))));
        assert_eq!(fx.auth.refresh_count(), 0);
        // Session state untouched.
        assert_eq!(
            fx.session.credentials().access_token().unwrap().as_deref(),
            Some(token.as_str())
        );
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[SessionEvent::Navigate(NavTarget::Forbidden)]
        );
    }

    #[tokio::test]
    async fn test_renewal_header_is_persisted() {
        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(3600));
        let renewed = jwt_expiring_in(7200);
        fx.http
            .push_with_headers(200, "{}", &[("x-renewed-token", renewed.as_str())]);

        fx.client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await
            .unwrap();

        let stored = fx.session.credentials().load_credential().unwrap().unwrap();
        assert_eq!(stored.access_token, renewed);
        // Refresh token survives a sliding renewal.
        assert_eq!(stored.refresh_token, "R1");
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_session_alone() {
        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(3600));
        fx.http.push_network_error();

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees"))
            .await;

        assert!(matches!(result, Err(ApiError::Network(_))));
        assert!(!fx.session.is_expired());
    }

    #[tokio::test]
    async fn test_business_errors_pass_through_normalized() {
        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(3600));
        fx.http.push(404, "no such employee");

        let result = fx
            .client
            .send(ApiRequest::get("https://api.example.com/employees/99"))
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert!(!fx.session.is_expired());
    }

    #[tokio::test]
    async fn test_typed_get_deserializes_body() {
        #[derive(serde::Deserialize)]
        struct Employee {
            name: String,
        }

        let fx = fixture(MockAuth::new());
        seed(&fx, &jwt_expiring_in(3600));
        fx.http.push(200, r#"{"name": "Alice"}"#);

        let employee: Employee = fx
            .client
            .get("https://api.example.com/employees/1")
            .await
            .unwrap();
        assert_eq!(employee.name, "Alice");
    }
}
