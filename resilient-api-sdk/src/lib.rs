//! Resilient API SDK
//!
//! A resilience layer between application code and a remote HTTP API. It
//! attaches credentials, retries transient failures, coordinates a single
//! token refresh across concurrent callers, gates requests behind
//! out-of-band compliance requirements, deduplicates in-flight reads via a
//! short-lived cache, and supports keyed cooperative cancellation.
//!
//! # Features
//!
//! - **Retries**: exponential backoff `min(cap, base * 2^attempt)` for
//!   network failures, timeouts, 5xx and configured transient statuses
//! - **Single-flight refresh**: any number of concurrent 401s trigger exactly
//!   one refresh exchange
//! - **Compliance gate**: requests hitting a policy requirement are queued,
//!   presented once, and replayed in order when resolved
//! - **Read cache**: TTL cache with in-flight load sharing and invalidation
//!   on writes to the same resource family
//! - **Cancellation**: reusing a cancellation key cancels the previous request
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resilient_api_sdk::{
//!     CacheDirective, InMemoryCredentialStore, RequestContext, ResilientClient, SdkConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SdkConfig::builder("https://petstore.example.com")
//!         .max_retries(3)
//!         .build();
//!     let client = ResilientClient::new(config, Arc::new(InMemoryCredentialStore::new()))?;
//!
//!     let response = client
//!         .send(
//!             RequestContext::get("/api/pet/5")
//!                 .with_cache(CacheDirective::new().with_ttl(Duration::from_secs(30)))
//!                 .with_cancellation_key("pet-detail"),
//!         )
//!         .await?;
//!     println!("{}", response.body);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Compliance prompts
//!
//! ```rust,no_run
//! use resilient_api_sdk::{PolicyPrompt, ResilientClient};
//!
//! fn present_policies(client: &ResilientClient) {
//!     client.subscribe_policy(|prompt: PolicyPrompt| {
//!         println!("Please accept: {}", prompt.message);
//!         // Once the user accepted out of band:
//!         prompt.resolve();
//!     });
//! }
//! ```
//!
//! # Error Handling
//!
//! ```rust,no_run
//! use resilient_api_sdk::{ResilientClient, SdkError};
//!
//! async fn load(client: &ResilientClient) {
//!     match client.get::<serde_json::Value>("/api/pet/5").await {
//!         Ok(pet) => println!("{}", pet),
//!         Err(SdkError::Cancelled) => {}
//!         Err(SdkError::SessionInvalidated(_)) => eprintln!("Please log in again"),
//!         Err(SdkError::RetryExhausted { attempts, last }) => {
//!             eprintln!("Gave up after {} attempts: {}", attempts, last)
//!         }
//!         Err(e) => eprintln!("Request failed: {}", e),
//!     }
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod cancellation;
pub mod client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod policy;
pub mod refresh;
pub mod retry;
pub mod transport;

pub use cache::{CacheStatistics, ResponseCache};
pub use cancellation::{CancellationGuard, CancellationRegistry};
pub use client::{ClientBuilder, ResilientClient};
pub use config::{SdkConfig, SdkConfigBuilder, SdkSettings};
pub use context::{CacheDirective, RequestContext};
pub use credentials::{CredentialStore, InMemoryCredentialStore, TokenPair};
pub use error::{NetworkErrorKind, SdkError, SdkResult};
pub use policy::{
    GateStatus, PolicyComplianceGate, PolicyConfig, PolicyPrompt, PolicyRequirement,
    PolicySubscriber, SubscriptionId,
};
pub use refresh::{RefreshConfig, RefreshSnapshot, RefreshStatus, SessionEvent, TokenRefreshCoordinator};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use transport::{ApiResponse, ReqwestTransport, Transport, TransportRequest};
