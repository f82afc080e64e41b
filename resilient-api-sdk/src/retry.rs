//! Retry classification and exponential backoff.
//!
//! Transient failures (no response, timeouts, 5xx and the configured
//! transient client statuses) are retried in place with a delay of
//! `min(cap, base * 2^attempt)`. Requests that are already a post-refresh
//! replay are never retried here, so a refresh pass stays bounded.

use std::time::Duration;

use crate::context::RequestContext;
use crate::error::SdkError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Client statuses treated as transient when they carry no `Retry-After`
    pub transient_statuses: Vec<u16>,
    /// Randomize each delay between zero and the computed value
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            transient_statuses: vec![408, 429],
            jitter: false,
        }
    }
}

/// `min(cap, base * 2^attempt)`, saturating at `cap`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Outcome of consulting the policy for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the delay, then dispatch again
    Retry(Duration),
    /// Transient, but the attempt bound is reached
    Exhausted,
    /// Not handled by this policy
    DoNotRetry,
}

/// Decides whether and when a failed request is dispatched again
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Network failures, timeouts, 5xx and the configured transient statuses
    pub fn is_transient(&self, error: &SdkError) -> bool {
        match error {
            SdkError::ClientError { status, .. } => {
                self.config.transient_statuses.contains(status)
            }
            other => other.is_retryable(),
        }
    }

    /// Retry bound for this request
    pub fn max_retries(&self, context: &RequestContext) -> u32 {
        context.max_retries().unwrap_or(self.config.max_retries)
    }

    pub fn should_retry(&self, error: &SdkError, context: &RequestContext) -> bool {
        matches!(self.decide(error, context), RetryDecision::Retry(_))
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
        if self.config.jitter {
            Duration::from_secs_f64(delay.as_secs_f64() * rand::random::<f64>())
        } else {
            delay
        }
    }

    pub fn decide(&self, error: &SdkError, context: &RequestContext) -> RetryDecision {
        if context.refresh_attempted() || !self.is_transient(error) {
            return RetryDecision::DoNotRetry;
        }

        if context.attempt() < self.max_retries(context) {
            RetryDecision::Retry(self.next_delay(context.attempt()))
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
