#![allow(dead_code)]

use async_trait::async_trait;
use resilient_api_sdk::{
    ApiResponse, InMemoryCredentialStore, ResilientClient, SdkConfig, SdkResult, TokenPair,
    Transport, TransportRequest,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const BASE_URL: &str = "https://api.test";

type Handler = Box<dyn Fn(&TransportRequest) -> SdkResult<ApiResponse> + Send + Sync>;
type Latency = Box<dyn Fn(&TransportRequest) -> Duration + Send + Sync>;

/// In-process transport: records every request, waits `latency`, then answers
/// with `handler`
pub struct ScriptedTransport {
    handler: Handler,
    latency: Latency,
    log: Mutex<Vec<(Instant, TransportRequest)>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&TransportRequest) -> SdkResult<ApiResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_latency(Duration::from_millis(10), handler)
    }

    pub fn with_latency(
        latency: Duration,
        handler: impl Fn(&TransportRequest) -> SdkResult<ApiResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_latency_fn(move |_| latency, handler)
    }

    /// Latency chosen per request
    pub fn with_latency_fn(
        latency: impl Fn(&TransportRequest) -> Duration + Send + Sync + 'static,
        handler: impl Fn(&TransportRequest) -> SdkResult<ApiResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            latency: Box::new(latency),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Number of requests whose URL contains `fragment`
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, request)| request.url.contains(fragment))
            .count()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// When each request reached the transport
    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> SdkResult<ApiResponse> {
        self.log.lock().unwrap().push((Instant::now(), request.clone()));
        sleep((self.latency)(&request)).await;
        (self.handler)(&request)
    }
}

pub fn config() -> SdkConfig {
    SdkConfig::builder(BASE_URL)
        .retry_backoff(Duration::from_millis(100), Duration::from_secs(1))
        .refresh_backoff(Duration::from_millis(500), Duration::from_secs(5))
        .build()
}

pub fn logged_in() -> Arc<InMemoryCredentialStore> {
    Arc::new(InMemoryCredentialStore::with_tokens(TokenPair::new(
        "access-0",
        "refresh-0",
    )))
}

pub fn client(transport: Arc<ScriptedTransport>, credentials: Arc<InMemoryCredentialStore>) -> ResilientClient {
    client_with_config(config(), transport, credentials)
}

pub fn client_with_config(
    config: SdkConfig,
    transport: Arc<ScriptedTransport>,
    credentials: Arc<InMemoryCredentialStore>,
) -> ResilientClient {
    ResilientClient::builder(config)
        .transport(transport)
        .credentials(credentials)
        .build()
        .expect("valid test config")
}

pub fn json(status: u16, body: serde_json::Value) -> SdkResult<ApiResponse> {
    Ok(ApiResponse::json_body(status, &body))
}

pub fn bearer(request: &TransportRequest) -> Option<&str> {
    request
        .header("authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
}

pub fn is_refresh(request: &TransportRequest) -> bool {
    request.url.ends_with("/auth/refresh")
}

pub fn policy_required() -> SdkResult<ApiResponse> {
    json(
        403,
        serde_json::json!({
            "error": "POLICY_ACCEPTANCE_REQUIRED",
            "message": "Accept the updated terms to continue",
            "details": {
                "requirements": [{"id": "terms", "version": "2026-09"}]
            }
        }),
    )
}
