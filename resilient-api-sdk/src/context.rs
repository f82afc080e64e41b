//! Per-call request description
//!
//! A [`RequestContext`] identifies one logical call. It is a value: the
//! pipeline never mutates it in place. Retries, refresh replays and policy
//! replays each derive a fresh context carrying the updated attempt count and
//! flags, so a replayed request can never re-enter a handler it already went
//! through.

use reqwest::Method;
use serde::Serialize;
use std::time::Duration;

use crate::error::SdkResult;

/// Read-cache directive for a safe request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirective {
    /// Explicit cache key; derived from path and sorted query when absent
    pub key: Option<String>,
    /// Entry lifetime; the client default applies when absent
    pub ttl: Option<Duration>,
}

impl CacheDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// One logical call through the client
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    attempt: u32,
    refresh_attempted: bool,
    policy_retry_attempted: bool,
    cancellation_key: Option<String>,
    cache: Option<CacheDirective>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl RequestContext {
    /// Create a context for `method` on `path` (relative to the base URL)
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            attempt: 0,
            refresh_attempted: false,
            policy_retry_attempted: false,
            cancellation_key: None,
            cache: None,
            timeout: None,
            max_retries: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn with_json<B: Serialize>(mut self, body: &B) -> SdkResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach an already-encoded JSON body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add every field of a serializable struct as a query parameter
    pub fn with_query_params<Q: Serialize>(mut self, params: &Q) -> SdkResult<Self> {
        if let serde_json::Value::Object(map) = serde_json::to_value(params)? {
            for (name, value) in map {
                match value {
                    serde_json::Value::Null => {}
                    serde_json::Value::String(s) => self.query.push((name, s)),
                    other => self.query.push((name, other.to_string())),
                }
            }
        }
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Run under a cancellation key; a later request under the same key
    /// cancels this one
    pub fn with_cancellation_key(mut self, key: impl Into<String>) -> Self {
        self.cancellation_key = Some(key.into());
        self
    }

    /// Serve this read from the response cache
    pub fn with_cache(mut self, directive: CacheDirective) -> Self {
        self.cache = Some(directive);
        self
    }

    /// Per-call transport timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the configured retry bound for this call
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Number of retries already dispatched for this call
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn refresh_attempted(&self) -> bool {
        self.refresh_attempted
    }

    pub fn policy_retry_attempted(&self) -> bool {
        self.policy_retry_attempted
    }

    pub fn cancellation_key(&self) -> Option<&str> {
        self.cancellation_key.as_deref()
    }

    pub fn cache(&self) -> Option<&CacheDirective> {
        self.cache.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// GET, HEAD, OPTIONS and TRACE
    pub fn is_safe(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        )
    }

    /// The context for the next retry
    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// The context replayed after a token refresh
    pub(crate) fn as_refresh_retry(&self) -> Self {
        Self {
            refresh_attempted: true,
            ..self.clone()
        }
    }

    /// The context replayed after a compliance requirement was resolved
    pub(crate) fn as_policy_retry(&self) -> Self {
        Self {
            policy_retry_attempted: true,
            ..self.clone()
        }
    }
}
