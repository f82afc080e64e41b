//! SDK configuration
//!
//! [`SdkConfig`] is what the client runs on. It can be assembled in code with
//! [`SdkConfigBuilder`] or loaded with [`SdkConfig::load`] from optional
//! `config/default` and `config/local` files overlaid with `RESILIENT_API_*`
//! environment variables.

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{SdkError, SdkResult};
use crate::policy::PolicyConfig;
use crate::refresh::RefreshConfig;
use crate::retry::RetryConfig;

/// Configuration for the SDK client
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Path prefix stripped before deriving a resource family for cache invalidation
    pub api_prefix: String,

    /// Request timeout
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    pub retry: RetryConfig,

    pub refresh: RefreshConfig,

    pub policy: PolicyConfig,

    /// TTL of cached responses when the request does not set one
    pub cache_ttl: Duration,

    /// Upper bound on cached responses; the oldest entry is evicted beyond it
    pub cache_max_entries: usize,

    /// User agent string
    pub user_agent: String,

    /// Log request and response bodies at debug level
    pub enable_logging: bool,

    /// Custom headers to add to all requests
    pub custom_headers: Vec<(String, String)>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            refresh: RefreshConfig::default(),
            policy: PolicyConfig::default(),
            cache_ttl: Duration::from_secs(30),
            cache_max_entries: 1024,
            user_agent: format!("resilient-api-sdk/{}", env!("CARGO_PKG_VERSION")),
            enable_logging: false,
            custom_headers: Vec::new(),
        }
    }
}

impl SdkConfig {
    /// Create a new configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Create a new builder with the given base URL
    pub fn builder(base_url: impl Into<String>) -> SdkConfigBuilder {
        SdkConfigBuilder {
            config: Self::new(base_url),
        }
    }

    /// Load from `config/default`, `config/local` and `RESILIENT_API_*` variables
    pub fn load() -> SdkResult<Self> {
        let loader = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Self::environment())
            .build()
            .map_err(|e| SdkError::ConfigurationError(e.to_string()))?;

        Self::from_loader(loader)
    }

    /// Load from a single file, overlaid with `RESILIENT_API_*` variables
    pub fn load_from(path: impl AsRef<Path>) -> SdkResult<Self> {
        let loader = ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()
            .map_err(|e| SdkError::ConfigurationError(e.to_string()))?;

        Self::from_loader(loader)
    }

    fn environment() -> Environment {
        Environment::with_prefix("RESILIENT_API")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("transient_statuses")
            .with_list_parse_key("auth_endpoints")
            .with_list_parse_key("policy_reason_codes")
    }

    fn from_loader(loader: ConfigLoader) -> SdkResult<Self> {
        let settings: SdkSettings = loader
            .try_deserialize()
            .map_err(|e| SdkError::ConfigurationError(e.to_string()))?;
        let config = Self::from(settings);
        config.validate()?;
        Ok(config)
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the retry backoff configuration
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_delay = base;
        self.retry.max_delay = max;
        self
    }

    /// Add a custom header to all requests
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Absolute URL for `path`. Absolute URLs pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> SdkResult<()> {
        if self.base_url.is_empty() {
            return Err(SdkError::ConfigurationError(
                "Base URL cannot be empty".to_string(),
            ));
        }

        url::Url::parse(&self.base_url)?;

        if self.timeout.is_zero() {
            return Err(SdkError::ConfigurationError(
                "Timeout cannot be zero".to_string(),
            ));
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(SdkError::ConfigurationError(format!(
                "Retry base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }

        if self.refresh.backoff_base > self.refresh.backoff_max {
            return Err(SdkError::ConfigurationError(format!(
                "Refresh backoff base {:?} exceeds max {:?}",
                self.refresh.backoff_base, self.refresh.backoff_max
            )));
        }

        Ok(())
    }
}

/// Flat, file- and environment-friendly form of [`SdkConfig`]. Durations are
/// in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    pub base_url: String,
    pub api_prefix: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    pub transient_statuses: Vec<u16>,
    pub refresh_endpoint: String,
    pub auth_endpoints: Vec<String>,
    pub refresh_backoff_base_ms: u64,
    pub refresh_backoff_max_ms: u64,
    pub policy_status: u16,
    pub policy_reason_codes: Vec<String>,
    pub cache_ttl_ms: u64,
    pub cache_max_entries: usize,
    pub user_agent: String,
    pub enable_logging: bool,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for SdkSettings {
    fn default() -> Self {
        let config = SdkConfig::default();
        Self {
            base_url: config.base_url,
            api_prefix: config.api_prefix,
            timeout_ms: millis(config.timeout),
            connect_timeout_ms: millis(config.connect_timeout),
            max_retries: config.retry.max_retries,
            retry_base_delay_ms: millis(config.retry.base_delay),
            retry_max_delay_ms: millis(config.retry.max_delay),
            retry_jitter: config.retry.jitter,
            transient_statuses: config.retry.transient_statuses,
            refresh_endpoint: config.refresh.endpoint,
            auth_endpoints: config.refresh.auth_endpoints,
            refresh_backoff_base_ms: millis(config.refresh.backoff_base),
            refresh_backoff_max_ms: millis(config.refresh.backoff_max),
            policy_status: config.policy.status,
            policy_reason_codes: config.policy.reason_codes,
            cache_ttl_ms: millis(config.cache_ttl),
            cache_max_entries: config.cache_max_entries,
            user_agent: config.user_agent,
            enable_logging: config.enable_logging,
        }
    }
}

impl From<SdkSettings> for SdkConfig {
    fn from(settings: SdkSettings) -> Self {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Self {
            base_url: settings.base_url,
            api_prefix: settings.api_prefix,
            timeout,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            retry: RetryConfig {
                max_retries: settings.max_retries,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
                transient_statuses: settings.transient_statuses,
                jitter: settings.retry_jitter,
            },
            refresh: RefreshConfig {
                endpoint: settings.refresh_endpoint,
                auth_endpoints: settings.auth_endpoints,
                backoff_base: Duration::from_millis(settings.refresh_backoff_base_ms),
                backoff_max: Duration::from_millis(settings.refresh_backoff_max_ms),
                timeout,
            },
            policy: PolicyConfig {
                status: settings.policy_status,
                reason_codes: settings.policy_reason_codes,
            },
            cache_ttl: Duration::from_millis(settings.cache_ttl_ms),
            cache_max_entries: settings.cache_max_entries,
            user_agent: settings.user_agent,
            enable_logging: settings.enable_logging,
            custom_headers: Vec::new(),
        }
    }
}

/// Builder for SDK configuration
#[derive(Debug, Default)]
pub struct SdkConfigBuilder {
    config: SdkConfig,
}

impl SdkConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.api_prefix = prefix.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry.base_delay = base;
        self.config.retry.max_delay = max;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn refresh(mut self, refresh: RefreshConfig) -> Self {
        self.config.refresh = refresh;
        self
    }

    pub fn refresh_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.refresh.backoff_base = base;
        self.config.refresh.backoff_max = max;
        self
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.config.cache_max_entries = max;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn logging(mut self, enable: bool) -> Self {
        self.config.enable_logging = enable;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> SdkConfig {
        self.config
    }
}
