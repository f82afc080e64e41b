//! SDK error types and handling
//!
//! Every failure that crosses the client boundary is an [`SdkError`]. Transient
//! failures, expired access tokens and compliance requirements are handled
//! inside the client; they only reach the caller once retries are exhausted,
//! the session is gone, or the user declined the requirement.

use crate::policy::{PolicyConfig, PolicyRequirement};
use std::time::Duration;
use thiserror::Error;

/// Low-level cause of a failure that produced no HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Could not establish a connection
    Connect,
    /// Connection was reset or closed mid-request
    Reset,
    /// The request could not be built or sent
    Request,
    /// The response body could not be read
    Body,
    /// Anything the transport could not classify
    Other,
}

/// The main error type for the SDK
#[derive(Error, Debug, Clone)]
pub enum SdkError {
    /// The request was cancelled by the caller or superseded under its cancellation key
    #[error("Request cancelled")]
    Cancelled,

    /// Network failure with no HTTP response
    #[error("Network error ({kind:?}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// A transient failure persisted through every permitted retry
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<SdkError> },

    /// The access token was rejected and could not be renewed for this request
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    /// The refresh token was rejected; stored credentials have been purged
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// The server requires the user to accept one or more policies first
    #[error("Policy acceptance required ({code}): {message}")]
    PolicyRequired {
        code: String,
        message: String,
        requirements: Vec<PolicyRequirement>,
    },

    /// Rate limit exceeded with an explicit `Retry-After`
    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Any other 4xx response
    #[error("Client error: {status} - {message}")]
    ClientError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// 5xx response
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
}

/// Result type alias for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::SerializationError(err.to_string())
    }
}

/// A background load or refresh task that was aborted or panicked
impl From<tokio::task::JoinError> for SdkError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            SdkError::Cancelled
        } else {
            SdkError::Network {
                kind: NetworkErrorKind::Other,
                message: format!("background task failed: {}", err),
            }
        }
    }
}

/// API error response structure
#[derive(Debug, serde::Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl SdkError {
    /// Create an error from a non-success response
    pub fn from_response(
        status: u16,
        retry_after: Option<u64>,
        body: &str,
        policy: &PolicyConfig,
    ) -> Self {
        let envelope = serde_json::from_str::<ApiErrorResponse>(body).ok();
        let code = envelope.as_ref().map(|e| e.error.clone());
        let message = match &envelope {
            Some(e) if !e.message.is_empty() => e.message.clone(),
            _ if body.is_empty() => format!("HTTP {}", status),
            _ => body.to_string(),
        };

        if status == policy.status {
            if let Some(code) = code.as_deref().filter(|c| policy.is_reason_code(c)) {
                let requirements = envelope
                    .as_ref()
                    .and_then(|e| e.details.as_ref())
                    .and_then(|d| d.get("requirements"))
                    .and_then(|r| serde_json::from_value(r.clone()).ok())
                    .unwrap_or_default();

                return SdkError::PolicyRequired {
                    code: code.to_string(),
                    message,
                    requirements,
                };
            }
        }

        match (status, retry_after) {
            (401, _) => SdkError::AuthExpired(message),
            (429, Some(retry_after)) => SdkError::RateLimited { retry_after },
            (500..=599, _) => SdkError::ServerError { status, message },
            _ => SdkError::ClientError {
                status,
                code,
                message,
            },
        }
    }

    /// Failures that carry no response or a 5xx. Explicitly transient client
    /// statuses are decided by the retry policy's configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SdkError::Network { .. } | SdkError::Timeout(_) | SdkError::ServerError { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SdkError::Cancelled)
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SdkError::AuthExpired(_))
    }

    pub fn is_session_invalidated(&self) -> bool {
        matches!(self, SdkError::SessionInvalidated(_))
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SdkError::AuthExpired(_) => Some(401),
            SdkError::RateLimited { .. } => Some(429),
            SdkError::ClientError { status, .. } | SdkError::ServerError { status, .. } => {
                Some(*status)
            }
            SdkError::RetryExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}
