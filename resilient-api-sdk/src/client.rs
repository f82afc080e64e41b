//! Request pipeline
//!
//! [`ResilientClient`] runs every call through the same sequence: attach the
//! access token and cancellation, dispatch through the [`Transport`], then on
//! failure consult, in order, cancellation, the compliance gate, the retry
//! policy and the token refresh coordinator before surfacing an error.
//! Cacheable reads go through the [`ResponseCache`] with that whole sequence
//! as the loader.

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cache::{cache_key_for, resource_family, CacheStatistics, ResponseCache};
use crate::cancellation::CancellationRegistry;
use crate::config::SdkConfig;
use crate::context::RequestContext;
use crate::credentials::{CredentialStore, InMemoryCredentialStore};
use crate::error::{SdkError, SdkResult};
use crate::policy::{PolicyComplianceGate, PolicySubscriber, ReplayFn, SubscriptionId};
use crate::refresh::{RefreshSnapshot, SessionEvent, TokenRefreshCoordinator};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{ApiResponse, ReqwestTransport, Transport, TransportRequest};

struct ClientInner {
    config: SdkConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    registry: CancellationRegistry,
    retry: RetryPolicy,
    cache: ResponseCache<ApiResponse>,
    gate: PolicyComplianceGate,
    refresh: TokenRefreshCoordinator,
}

/// HTTP client with retries, token refresh, compliance gating, read caching
/// and keyed cancellation
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

impl ResilientClient {
    /// Create a client over the default reqwest transport
    pub fn new(config: SdkConfig, credentials: Arc<dyn CredentialStore>) -> SdkResult<Self> {
        Self::builder(config).credentials(credentials).build()
    }

    pub fn builder(config: SdkConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            credentials: None,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    /// Execute a request and return the raw response
    pub async fn send(&self, context: RequestContext) -> SdkResult<ApiResponse> {
        let span = info_span!(
            "request",
            method = %context.method(),
            url = %context.path(),
            cancellation_key = context.cancellation_key().unwrap_or_default(),
        );
        self.execute(context).instrument(span).await
    }

    async fn execute(&self, context: RequestContext) -> SdkResult<ApiResponse> {
        let guard = context
            .cancellation_key()
            .map(|key| self.inner.registry.register(key));
        let token = guard
            .as_ref()
            .map(|guard| guard.token().clone())
            .unwrap_or_default();

        let directive = context.cache().filter(|_| context.is_safe()).cloned();
        let Some(directive) = directive else {
            return self.run(context, token).await;
        };

        let key = directive
            .key
            .unwrap_or_else(|| cache_key_for(context.path(), context.query()));
        let ttl = directive.ttl.unwrap_or(self.inner.config.cache_ttl);
        let source = context.path().to_string();

        // The load is shared by every caller of `key`: one caller's
        // cancellation only detaches it, the last one leaving abandons it.
        let load = self.run(context, CancellationToken::new());
        let cached = self.inner.cache.get_or_load(&key, &source, ttl, move || load);

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SdkError::Cancelled),
            result = cached => result,
        }
    }

    /// The dispatch loop for one logical request. Retries and replays share
    /// `token`.
    fn run(
        &self,
        context: RequestContext,
        token: CancellationToken,
    ) -> BoxFuture<'static, SdkResult<ApiResponse>> {
        let client = self.clone();

        async move {
            let mut context = context;

            loop {
                if token.is_cancelled() {
                    return Err(SdkError::Cancelled);
                }

                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SdkError::Cancelled),
                    outcome = client.dispatch(&context) => outcome,
                };

                let error = match outcome {
                    Ok(response) => {
                        if !context.is_safe() {
                            client.invalidate_family(context.path());
                        }
                        return Ok(response);
                    }
                    Err(error) => error,
                };

                if error.is_cancelled() {
                    return Err(error);
                }

                if client.inner.gate.matches(&error, &context) {
                    let replay_client = client.clone();
                    let replay_token = token.clone();
                    let replay: ReplayFn =
                        Box::new(move |context| replay_client.run(context, replay_token));

                    return tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(SdkError::Cancelled),
                        outcome = client.inner.gate.handle(error, context, replay) => outcome,
                    };
                }

                match client.inner.retry.decide(&error, &context) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "Request failed ({}), retrying in {:?} (attempt {}/{})",
                            error,
                            delay,
                            context.attempt() + 1,
                            client.inner.retry.max_retries(&context)
                        );
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return Err(SdkError::Cancelled),
                            _ = sleep(delay) => {}
                        }
                        context = context.next_attempt();
                        continue;
                    }
                    RetryDecision::Exhausted => {
                        warn!("Retries exhausted after {} attempts", context.attempt() + 1);
                        return Err(SdkError::RetryExhausted {
                            attempts: context.attempt() + 1,
                            last: Box::new(error),
                        });
                    }
                    RetryDecision::DoNotRetry => {}
                }

                if error.is_auth_expired()
                    && !context.refresh_attempted()
                    && !client.inner.refresh.config().is_auth_endpoint(context.path())
                {
                    info!("Access token expired, refreshing");
                    let refreshed = tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(SdkError::Cancelled),
                        refreshed = client.inner.refresh.ensure_fresh_token() => refreshed,
                    };

                    let refresh_error = match refreshed {
                        Ok(_) => {
                            context = context.as_refresh_retry();
                            continue;
                        }
                        Err(refresh_error) => refresh_error,
                    };

                    // A refresh that failed without a server verdict leaves the
                    // session intact; the request goes back through the retry policy.
                    match client.inner.retry.decide(&refresh_error, &context) {
                        RetryDecision::Retry(delay) => {
                            warn!("Token refresh failed ({}), retrying in {:?}", refresh_error, delay);
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => return Err(SdkError::Cancelled),
                                _ = sleep(delay) => {}
                            }
                            context = context.next_attempt();
                            continue;
                        }
                        RetryDecision::Exhausted => {
                            return Err(SdkError::RetryExhausted {
                                attempts: context.attempt() + 1,
                                last: Box::new(refresh_error),
                            });
                        }
                        RetryDecision::DoNotRetry => return Err(refresh_error),
                    }
                }

                return Err(error);
            }
        }
        .boxed()
    }

    /// One transport round trip. Non-success statuses come back as errors.
    async fn dispatch(&self, context: &RequestContext) -> SdkResult<ApiResponse> {
        let config = &self.inner.config;

        let mut headers = Vec::with_capacity(context.headers().len() + 1);
        if let Some(access_token) = self.inner.credentials.access_token().await? {
            headers.push(("Authorization".to_string(), format!("Bearer {}", access_token)));
        }
        headers.extend(context.headers().iter().cloned());

        let timeout = context.timeout().unwrap_or(config.timeout);
        let request = TransportRequest {
            method: context.method().clone(),
            url: self.request_url(context)?,
            headers,
            body: context.body().cloned(),
            timeout,
        };

        if config.enable_logging {
            debug!("Request: {} {}", request.method, request.url);
            if let Some(body) = &request.body {
                debug!("Request body: {}", body);
            }
        }

        let response = tokio::time::timeout(timeout, self.inner.transport.send(request))
            .await
            .map_err(|_| SdkError::Timeout(timeout))??;

        if config.enable_logging {
            debug!("Response {}: {}", response.status, response.body);
        }

        if response.is_success() {
            Ok(response)
        } else {
            Err(SdkError::from_response(
                response.status,
                response.retry_after(),
                &response.body,
                &config.policy,
            ))
        }
    }

    fn request_url(&self, context: &RequestContext) -> SdkResult<String> {
        let mut url = url::Url::parse(&self.inner.config.url(context.path()))?;
        if !context.query().is_empty() {
            url.query_pairs_mut().extend_pairs(context.query());
        }
        Ok(url.to_string())
    }

    fn invalidate_family(&self, path: &str) {
        if let Some(family) = resource_family(path, &self.inner.config.api_prefix) {
            let removed = self.inner.cache.invalidate(&family);
            debug!("Write to {} invalidated {} cached responses", family, removed);
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> SdkResult<T> {
        self.send(RequestContext::get(path)).await?.json()
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize>(
        &self,
        path: &str,
        query: &Q,
    ) -> SdkResult<T> {
        let context = RequestContext::get(path).with_query_params(query)?;
        self.send(context).await?.json()
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SdkResult<T> {
        let context = RequestContext::post(path).with_json(body)?;
        self.send(context).await?.json()
    }

    /// Make a PUT request
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SdkResult<T> {
        let context = RequestContext::put(path).with_json(body)?;
        self.send(context).await?.json()
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SdkResult<T> {
        let context = RequestContext::patch(path).with_json(body)?;
        self.send(context).await?.json()
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> SdkResult<()> {
        self.send(RequestContext::delete(path)).await.map(|_| ())
    }

    /// Cancel the request registered under `key`
    pub fn cancel(&self, key: &str) -> bool {
        self.inner.registry.cancel(key)
    }

    pub fn cancel_all(&self) {
        self.inner.registry.cancel_all();
    }

    /// Drop cached responses whose key or path contains `pattern`
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.inner.cache.invalidate(pattern)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.inner.cache.statistics()
    }

    /// Register a presenter for compliance requirements
    pub fn subscribe_policy(&self, subscriber: impl PolicySubscriber + 'static) -> SubscriptionId {
        self.inner.gate.subscribe(Arc::new(subscriber))
    }

    pub fn unsubscribe_policy(&self, id: SubscriptionId) -> bool {
        self.inner.gate.unsubscribe(id)
    }

    pub fn policy_gate(&self) -> &PolicyComplianceGate {
        &self.inner.gate
    }

    /// Token refresh and session invalidation notifications
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.refresh.subscribe()
    }

    pub fn refresh_state(&self) -> RefreshSnapshot {
        self.inner.refresh.snapshot()
    }

    /// Exchange the refresh token now, joining any refresh already in flight
    pub async fn refresh_session(&self) -> SdkResult<String> {
        self.inner.refresh.ensure_fresh_token().await
    }
}

/// Builder for [`ResilientClient`]
pub struct ClientBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl ClientBuilder {
    /// Use `transport` instead of [`ReqwestTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to an empty [`InMemoryCredentialStore`]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> SdkResult<ResilientClient> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new()));

        let refresh = TokenRefreshCoordinator::new(
            config.refresh.clone(),
            config.url(&config.refresh.endpoint),
            Arc::clone(&transport),
            Arc::clone(&credentials),
        );

        Ok(ResilientClient {
            inner: Arc::new(ClientInner {
                retry: RetryPolicy::new(config.retry.clone()),
                cache: ResponseCache::new(config.cache_max_entries),
                gate: PolicyComplianceGate::new(config.policy.clone()),
                registry: CancellationRegistry::new(),
                refresh,
                transport,
                credentials,
                config,
            }),
        })
    }
}
