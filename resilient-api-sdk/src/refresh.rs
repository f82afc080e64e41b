//! Single-flight access token refresh.
//!
//! However many requests observe an expired access token at once, exactly
//! one refresh exchange reaches the transport; every caller awaits the same
//! shared outcome. Repeated failures back off exponentially on a counter of
//! their own, and only a refresh token the server explicitly rejects purges
//! the stored credentials. Network failures and 5xx leave them in place.
//!
//! The exchange runs on its own task, so a refresh that has started always
//! stores its tokens and settles the coordinator even when every caller
//! waiting on it has been cancelled.

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::credentials::{CredentialStore, TokenPair};
use crate::error::{SdkError, SdkResult};
use crate::policy::PolicyConfig;
use crate::retry::backoff_delay;
use crate::transport::{ApiResponse, Transport, TransportRequest};

/// Error codes on a 400 from the refresh endpoint that mean the refresh token is dead
const REJECTED_TOKEN_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "token_expired",
    "refresh_token_expired",
    "INVALID_REFRESH_TOKEN",
];

/// Configuration for token refresh
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Path of the refresh endpoint, relative to the base URL
    pub endpoint: String,
    /// Paths whose 401 is a credential error rather than an expired token
    pub auth_endpoints: Vec<String>,
    /// Backoff before the refresh following a failed one
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Transport timeout of the refresh exchange
    pub timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            endpoint: "/auth/refresh".to_string(),
            auth_endpoints: vec![
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/auth/refresh".to_string(),
                "/auth/forgot-password".to_string(),
            ],
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            timeout: Duration::from_secs(15),
        }
    }
}

impl RefreshConfig {
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        self.auth_endpoints.iter().any(|endpoint| path.contains(endpoint.as_str()))
    }
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New tokens were stored
    Refreshed,
    /// The refresh token was rejected and credentials were purged
    Invalidated { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Idle,
    Refreshing,
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub status: RefreshStatus,
    pub consecutive_failures: u32,
}

type SharedRefresh = Shared<BoxFuture<'static, SdkResult<String>>>;

struct RefreshState {
    in_flight: Option<SharedRefresh>,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct Enveloped {
    data: RefreshResponse,
}

struct CoordinatorInner {
    config: RefreshConfig,
    refresh_url: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CoordinatorInner {
    /// Time still to wait before another refresh may start
    fn backoff_remaining(&self, state: &RefreshState) -> Duration {
        if state.consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let delay = backoff_delay(
            state.consecutive_failures - 1,
            self.config.backoff_base,
            self.config.backoff_max,
        );
        let elapsed = state
            .last_attempt
            .map(|at| at.elapsed())
            .unwrap_or(delay);
        delay.saturating_sub(elapsed)
    }

    async fn run(self: Arc<Self>, wait: Duration) -> SdkResult<String> {
        if !wait.is_zero() {
            info!("Waiting {:?} before retrying token refresh", wait);
            sleep(wait).await;
        }
        lock(&self.state).last_attempt = Some(Instant::now());

        let result = self.exchange().await;

        if let Err(SdkError::SessionInvalidated(reason)) = &result {
            warn!("Refresh token rejected, purging credentials: {}", reason);
            if let Err(e) = self.credentials.clear().await {
                error!("Failed to purge credentials: {}", e);
            }
            let _ = self.events.send(SessionEvent::Invalidated {
                reason: reason.clone(),
            });
        }

        let mut state = lock(&self.state);
        state.in_flight = None;
        match &result {
            Ok(_) => {
                state.consecutive_failures = 0;
                drop(state);
                info!("Access token refreshed");
                let _ = self.events.send(SessionEvent::Refreshed);
            }
            Err(e) => {
                state.consecutive_failures += 1;
                warn!(
                    "Token refresh failed ({} consecutive): {}",
                    state.consecutive_failures, e
                );
            }
        }

        result
    }

    /// One refresh-token-for-token-pair exchange
    async fn exchange(&self) -> SdkResult<String> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .await?
            .ok_or_else(|| SdkError::SessionInvalidated("no refresh token stored".to_string()))?;

        let request = TransportRequest {
            method: Method::POST,
            url: self.refresh_url.clone(),
            headers: Vec::new(),
            body: Some(serde_json::json!({ "refresh_token": refresh_token })),
            timeout: self.config.timeout,
        };

        debug!("Exchanging refresh token at {}", self.refresh_url);
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(Self::classify_failure(&response));
        }

        let tokens = Self::parse_tokens(&response)?;
        let access_token = tokens.access_token;
        self.credentials
            .store(TokenPair::new(
                access_token.clone(),
                tokens.refresh_token.unwrap_or(refresh_token),
            ))
            .await?;

        Ok(access_token)
    }

    fn parse_tokens(response: &ApiResponse) -> SdkResult<RefreshResponse> {
        response
            .json::<RefreshResponse>()
            .or_else(|_| response.json::<Enveloped>().map(|e| e.data))
    }

    fn classify_failure(response: &ApiResponse) -> SdkError {
        let error = SdkError::from_response(
            response.status,
            response.retry_after(),
            &response.body,
            &PolicyConfig::default(),
        );

        match error {
            SdkError::AuthExpired(message) => SdkError::SessionInvalidated(message),
            SdkError::ClientError { status: 403, message, .. }
            | SdkError::PolicyRequired { message, .. } => SdkError::SessionInvalidated(message),
            SdkError::ClientError {
                status: 400,
                code: Some(code),
                message,
            } if REJECTED_TOKEN_CODES.contains(&code.as_str()) => {
                SdkError::SessionInvalidated(message)
            }
            other => other,
        }
    }
}

/// Coordinates access token renewal across every in-flight request
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TokenRefreshCoordinator {
    /// `refresh_url` is the absolute URL of the refresh endpoint
    pub fn new(
        config: RefreshConfig,
        refresh_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                refresh_url: refresh_url.into(),
                transport,
                credentials,
                state: Mutex::new(RefreshState {
                    in_flight: None,
                    consecutive_failures: 0,
                    last_attempt: None,
                }),
                events,
            }),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Resolve to a freshly issued access token, joining the refresh already
    /// in flight if there is one. Dropping the returned future leaves the
    /// refresh running.
    pub async fn ensure_fresh_token(&self) -> SdkResult<String> {
        let refresh = {
            let mut state = lock(&self.inner.state);
            match &state.in_flight {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let wait = self.inner.backoff_remaining(&state);
                    let task = tokio::spawn(Arc::clone(&self.inner).run(wait));
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move {
                        task.await.unwrap_or_else(|e| {
                            error!("Token refresh task failed: {}", e);
                            lock(&inner.state).in_flight = None;
                            Err(SdkError::from(e))
                        })
                    }
                    .boxed()
                    .shared();
                    state.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        let state = lock(&self.inner.state);
        RefreshSnapshot {
            status: if state.in_flight.is_some() {
                RefreshStatus::Refreshing
            } else {
                RefreshStatus::Idle
            },
            consecutive_failures: state.consecutive_failures,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}
