//! Session service: the authentication state machine.
//!
//! Owns login, logout, expiry checks, and refresh. Refresh is single-flight:
//! at most one refresh network call is outstanding at any time, and every
//! concurrent caller receives the result of that one call. A proactive
//! one-shot timer re-arms on each successful login or refresh and fires a
//! refresh shortly before the known expiration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::error::{AuthError, RefreshError};
use crate::api::transport::AuthTransport;
use crate::config::Config;
use crate::models::Credential;
use crate::storage::CredentialStore;
use crate::token;

/// Session status, derived from the presence of a non-expired credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
}

/// Where the host application should navigate after a terminal auth outcome.
/// Routing itself is the host's concern; this crate only announces targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    /// The login view. `expired` is set when the session ended because a
    /// token expired.
    Login { expired: bool },
    /// The forbidden-access view.
    Forbidden,
}

/// Lifecycle events delivered to the registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    Refreshed,
    LoggedOut,
    Navigate(NavTarget),
}

pub type SessionEventHandler = Box<dyn Fn(SessionEvent) + Send + Sync>;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

struct SessionInner {
    store: CredentialStore,
    transport: Arc<dyn AuthTransport>,
    config: Config,
    /// Guards the single-flight invariant: `Some` exactly while a refresh
    /// network call is outstanding. Later callers clone the shared future
    /// instead of issuing their own call.
    refresh_in_flight: Mutex<Option<RefreshFuture>>,
    /// One-shot proactive refresh task. Aborted on logout and on re-arm.
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every teardown. A refresh that started under an older epoch
    /// discards its result instead of persisting into a cleared session.
    epoch: AtomicU64,
    event_handler: Mutex<Option<SessionEventHandler>>,
}

/// Handle to the session. Clone is cheap; all clones share state.
///
/// Constructed explicitly from its collaborators - there is no ambient
/// global. Dropping the last handle aborts the proactive timer.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<SessionInner>,
}

impl SessionService {
    pub fn new(store: CredentialStore, transport: Arc<dyn AuthTransport>, config: Config) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store,
                transport,
                config,
                refresh_in_flight: Mutex::new(None),
                refresh_timer: Mutex::new(None),
                epoch: AtomicU64::new(0),
                event_handler: Mutex::new(None),
            }),
        }
    }

    /// Register the handler that receives session events.
    pub fn on_event(&self, handler: SessionEventHandler) {
        *self.inner.event_handler.lock().unwrap() = Some(handler);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.inner.emit(event);
    }

    pub(crate) fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_expired() {
            SessionStatus::Anonymous
        } else {
            SessionStatus::Authenticated
        }
    }

    pub fn username(&self) -> Option<String> {
        self.inner.store.username().ok().flatten()
    }

    /// Authenticate and establish a session.
    ///
    /// On failure nothing stored is mutated; the user can simply retry.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, AuthError> {
        let response = self.inner.transport.login(username, password).await?;
        let credential = Credential::from_response(&response);

        self.inner
            .store
            .store_credential(&credential)
            .and_then(|_| self.inner.store.set_username(username))
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        self.inner.arm_refresh_timer(credential.expires_at);
        info!(username, expires_at = %credential.expires_at, "login succeeded");
        self.inner.emit(SessionEvent::LoggedIn {
            username: username.to_string(),
        });
        Ok(credential)
    }

    /// Exchange the refresh token for a new credential.
    ///
    /// Single-flight: if a refresh is already in flight the caller becomes a
    /// waiter on it and no second network call is made. Any failure is
    /// terminal and tears the session down before the waiters are released.
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let fut = {
            let mut slot = self.inner.refresh_in_flight.lock().unwrap();
            if let Some(existing) = slot.as_ref() {
                debug!("refresh already in flight, joining as waiter");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let fut: RefreshFuture = async move {
                    let result = Arc::clone(&inner).do_refresh().await;
                    inner.refresh_in_flight.lock().unwrap().take();
                    result
                }
                .boxed()
                .shared();
                *slot = Some(fut.clone());
                fut
            }
        };
        fut.await
    }

    /// True when no token is stored, the token is unreadable, or its
    /// embedded expiry has passed.
    pub fn is_expired(&self) -> bool {
        match self.inner.store.access_token() {
            Ok(Some(access_token)) => token::is_expired(&access_token),
            _ => true,
        }
    }

    /// True when time-to-expiry is below the configured default threshold.
    pub fn will_expire_soon(&self) -> bool {
        self.will_expire_within(self.inner.config.expiry_threshold_minutes)
    }

    /// True when time-to-expiry is below `threshold_minutes`, or the token
    /// is missing or unreadable.
    pub fn will_expire_within(&self, threshold_minutes: i64) -> bool {
        let access_token = match self.inner.store.access_token() {
            Ok(Some(access_token)) => access_token,
            _ => return true,
        };
        match token::time_to_expiry(&access_token) {
            Some(remaining) => remaining < Duration::minutes(threshold_minutes),
            None => true,
        }
    }

    /// End the session: cancel the proactive timer, then clear every stored
    /// entry the session touched.
    pub fn logout(&self) {
        info!("logging out");
        self.inner.teardown();
    }

    /// Cancel background work without clearing stored credentials, for
    /// application shutdown.
    pub fn shutdown(&self) {
        self.inner.cancel_refresh_timer();
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        let handler = self.event_handler.lock().unwrap();
        if let Some(handler) = handler.as_ref() {
            handler(event);
        }
    }

    /// Timer cancellation is idempotent and always precedes state clearing,
    /// so a late firing never runs against cleared credentials.
    fn cancel_refresh_timer(&self) {
        if let Some(handle) = self.refresh_timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn teardown(&self) {
        self.cancel_refresh_timer();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear credential storage");
        }
        self.emit(SessionEvent::LoggedOut);
    }

    /// (Re)arm the one-shot proactive refresh for `expires_at` minus the
    /// configured lead. Holds only a weak reference, so a dropped session
    /// never refreshes from the background.
    fn arm_refresh_timer(self: &Arc<Self>, expires_at: DateTime<Utc>) {
        let fire_at = expires_at - self.config.refresh_lead();
        let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();
        let weak = Arc::downgrade(self);

        let mut slot = self.refresh_timer.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        debug!(delay_secs = delay.as_secs(), "proactive refresh timer armed");
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let service = SessionService { inner };
            if let Err(e) = service.refresh().await {
                warn!(error = %e, "proactive refresh failed");
            }
        }));
    }

    async fn do_refresh(self: Arc<Self>) -> Result<Credential, RefreshError> {
        let epoch = self.epoch.load(Ordering::SeqCst);

        let refresh_token = match self.store.refresh_token() {
            Ok(Some(refresh_token)) => refresh_token,
            Ok(None) => {
                warn!("refresh requested without a stored refresh token");
                self.teardown();
                return Err(RefreshError::NoRefreshToken);
            }
            Err(e) => {
                self.teardown();
                return Err(RefreshError::Storage(e.to_string()));
            }
        };

        debug!("refreshing access token");
        match self.transport.refresh(&refresh_token).await {
            Ok(response) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    debug!("session closed while refresh was in flight, discarding result");
                    return Err(RefreshError::Cancelled);
                }
                let credential = Credential::from_response(&response);
                if let Err(e) = self.store.store_credential(&credential) {
                    self.teardown();
                    return Err(RefreshError::Storage(e.to_string()));
                }
                self.arm_refresh_timer(credential.expires_at);
                info!(expires_at = %credential.expires_at, "access token refreshed");
                self.emit(SessionEvent::Refreshed);
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, tearing down session");
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    self.teardown();
                }
                Err(e)
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}
