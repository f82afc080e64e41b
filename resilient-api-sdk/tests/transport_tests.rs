//! End-to-end tests over the reqwest transport against a local mock server

use pretty_assertions::assert_eq;
use resilient_api_sdk::{
    CacheDirective, CredentialStore, InMemoryCredentialStore, NetworkErrorKind, RequestContext,
    ResilientClient, SdkConfig, SdkError, TokenPair,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Pet {
    id: u64,
    name: String,
}

fn fast_config(base_url: &str) -> SdkConfig {
    SdkConfig::builder(base_url)
        .retry_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .timeout(Duration::from_secs(5))
        .header("X-Client", "resilient-api-tests")
        .build()
}

fn client_for(base_url: &str, credentials: Arc<InMemoryCredentialStore>) -> ResilientClient {
    ResilientClient::new(fast_config(base_url), credentials).unwrap()
}

// ===== Transport Tests =====

#[tokio::test]
async fn test_get_with_default_headers_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pet/findByStatus"))
        .and(query_param("status", "available"))
        .and(header("X-Client", "resilient-api-tests"))
        .and(header("Accept", "application/json"))
        .and(header("Authorization", "Bearer token-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 1, "name": "Rex"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentialStore::with_tokens(TokenPair::new("token-a", "r")));
    let client = client_for(&server.uri(), credentials);

    let pets: Vec<Pet> = client
        .get_with_query("/api/pet/findByStatus", &serde_json::json!({"status": "available"}))
        .await
        .unwrap();

    assert_eq!(pets, vec![Pet { id: 1, name: "Rex".into() }]);
}

#[tokio::test]
async fn test_server_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pet/5"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/pet/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 5, "name": "Rex"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), Arc::new(InMemoryCredentialStore::new()));

    let pet: Pet = client.get("/api/pet/5").await.unwrap();
    assert_eq!(pet.id, 5);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/user/me"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1, "name": "ada"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "token_expired",
            "message": "jwt expired"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(serde_json::json!({"refresh_token": "stale-refresh"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh",
            "refreshToken": "fresh-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentialStore::with_tokens(TokenPair::new(
        "stale",
        "stale-refresh",
    )));
    let client = client_for(&server.uri(), credentials.clone());

    let user: Pet = client.get("/api/user/me").await.unwrap();

    assert_eq!(user.name, "ada");
    assert_eq!(
        credentials.refresh_token().await.unwrap().as_deref(),
        Some("fresh-refresh")
    );
}

#[tokio::test]
async fn test_rate_limit_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), Arc::new(InMemoryCredentialStore::new()));

    let err = client.send(RequestContext::get("/api/pet/5")).await.unwrap_err();
    assert!(matches!(err, SdkError::RateLimited { retry_after: 3 }));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), Arc::new(InMemoryCredentialStore::new()));

    let err = client
        .send(
            RequestContext::get("/api/pet/5")
                .with_timeout(Duration::from_millis(200))
                .with_max_retries(0),
        )
        .await
        .unwrap_err();

    match err {
        SdkError::RetryExhausted { attempts, last } => {
            assert_eq!(attempts, 1);
            assert!(matches!(*last, SdkError::Timeout(_)));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Nothing listens on the discard port locally.
    let client = client_for("http://127.0.0.1:9", Arc::new(InMemoryCredentialStore::new()));

    let err = client
        .send(RequestContext::get("/api/pet/5").with_max_retries(0))
        .await
        .unwrap_err();

    match err {
        SdkError::RetryExhausted { last, .. } => {
            assert!(matches!(
                *last,
                SdkError::Network { kind: NetworkErrorKind::Connect, .. }
            ));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cached_read_hits_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/store/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"available": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), Arc::new(InMemoryCredentialStore::new()));
    let read = || RequestContext::get("/api/store/inventory").with_cache(CacheDirective::new());

    let first = client.send(read()).await.unwrap();
    let second = client.send(read()).await.unwrap();

    assert_eq!(first.body, second.body);
    assert_eq!(client.cache_statistics().hits, 1);
}
