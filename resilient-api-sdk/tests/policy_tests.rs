mod common;

use common::*;
use pretty_assertions::assert_eq;
use resilient_api_sdk::{GateStatus, PolicyPrompt, RequestContext, ResilientClient, SdkError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Feed endpoint that demands policy acceptance until `accepted` is set
fn feed(accepted: Arc<AtomicBool>) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |request| {
        if accepted.load(Ordering::SeqCst) {
            let item = request.url.rsplit('/').next().unwrap_or_default().to_string();
            json(200, serde_json::json!({"item": item}))
        } else {
            policy_required()
        }
    })
}

fn collect_prompts(client: &ResilientClient) -> Arc<Mutex<Vec<PolicyPrompt>>> {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&prompts);
    client.subscribe_policy(move |prompt: PolicyPrompt| sink.lock().unwrap().push(prompt));
    prompts
}

fn spawn_get(client: &ResilientClient, path: &str) -> JoinHandle<Result<serde_json::Value, SdkError>> {
    let client = client.clone();
    let path = path.to_string();
    tokio::spawn(async move { client.get::<serde_json::Value>(&path).await })
}

async fn wait_for_queue(client: &ResilientClient, len: usize) {
    while client.policy_gate().queued() < len {
        sleep(Duration::from_millis(1)).await;
    }
}

// ===== Episode Tests =====

#[tokio::test(start_paused = true)]
async fn test_queued_requests_replay_in_order_after_resolution() {
    let accepted = Arc::new(AtomicBool::new(false));
    let transport = feed(Arc::clone(&accepted));
    let client = client(transport.clone(), logged_in());
    let prompts = collect_prompts(&client);

    let mut handles = Vec::new();
    for item in ["a", "b", "c"] {
        handles.push(spawn_get(&client, &format!("/api/feed/{}", item)));
        sleep(Duration::from_millis(2)).await;
    }
    wait_for_queue(&client, 3).await;

    assert_eq!(client.policy_gate().status(), GateStatus::AwaitingResolution);
    {
        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].code, "POLICY_ACCEPTANCE_REQUIRED");
        assert_eq!(prompts[0].requirements[0].id, "terms");
    }

    accepted.store(true, Ordering::SeqCst);
    let first_prompt = prompts.lock().unwrap()[0].clone();
    first_prompt.resolve();

    let mut items = Vec::new();
    for handle in handles {
        items.push(handle.await.unwrap().unwrap()["item"].clone());
    }
    assert_eq!(items, vec!["a", "b", "c"]);

    let replayed: Vec<String> = transport.requests()[3..]
        .iter()
        .map(|request| request.url.clone())
        .collect();
    assert_eq!(
        replayed,
        vec![
            format!("{}/api/feed/a", BASE_URL),
            format!("{}/api/feed/b", BASE_URL),
            format!("{}/api/feed/c", BASE_URL),
        ]
    );
    assert_eq!(client.policy_gate().status(), GateStatus::Idle);
    assert_eq!(client.policy_gate().queued(), 0);

    // Resolving a finished episode again changes nothing.
    first_prompt.resolve();
    assert_eq!(transport.calls(), 6);

    // A later requirement opens a fresh episode.
    accepted.store(false, Ordering::SeqCst);
    let late = spawn_get(&client, "/api/feed/d");
    wait_for_queue(&client, 1).await;

    let second_prompt = prompts.lock().unwrap()[1].clone();
    assert_eq!(second_prompt.episode(), first_prompt.episode() + 1);
    second_prompt.deny(None);

    assert!(matches!(
        late.await.unwrap(),
        Err(SdkError::PolicyRequired { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_denial_rejects_every_queued_request() {
    let transport = feed(Arc::new(AtomicBool::new(false)));
    let client = client(transport.clone(), logged_in());
    let prompts = collect_prompts(&client);

    let handles: Vec<_> = ["a", "b"]
        .iter()
        .map(|item| spawn_get(&client, &format!("/api/feed/{}", item)))
        .collect();
    wait_for_queue(&client, 2).await;

    let prompt = prompts.lock().unwrap()[0].clone();
    prompt.deny(Some(SdkError::ClientError {
        status: 451,
        code: Some("DECLINED".into()),
        message: "user declined the terms".into(),
    }));

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Err(SdkError::ClientError { status: 451, .. })
        ));
    }
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.policy_gate().status(), GateStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_replayed_request_cannot_reenter_gate() {
    let transport = feed(Arc::new(AtomicBool::new(false)));
    let client = client(transport.clone(), logged_in());
    let prompts = collect_prompts(&client);

    let handle = spawn_get(&client, "/api/feed/a");
    wait_for_queue(&client, 1).await;

    // Resolved without the server recording acceptance: the replay fails again.
    let prompt = prompts.lock().unwrap()[0].clone();
    prompt.resolve();

    assert!(matches!(
        handle.await.unwrap(),
        Err(SdkError::PolicyRequired { .. })
    ));
    assert_eq!(prompts.lock().unwrap().len(), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_requirement_without_subscriber_is_surfaced() {
    let transport = feed(Arc::new(AtomicBool::new(false)));
    let client = client(transport.clone(), logged_in());

    let err = client
        .send(RequestContext::get("/api/feed/a"))
        .await
        .unwrap_err();

    match err {
        SdkError::PolicyRequired { code, requirements, .. } => {
            assert_eq!(code, "POLICY_ACCEPTANCE_REQUIRED");
            assert_eq!(requirements.len(), 1);
        }
        other => panic!("expected PolicyRequired, got {:?}", other),
    }
    assert_eq!(client.policy_gate().status(), GateStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_presenter_is_not_notified() {
    let transport = feed(Arc::new(AtomicBool::new(false)));
    let client = client(transport, logged_in());

    let notified = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&notified);
    let id = client.subscribe_policy(move |_prompt: PolicyPrompt| flag.store(true, Ordering::SeqCst));
    assert!(client.unsubscribe_policy(id));
    assert!(!client.unsubscribe_policy(id));

    let err = client.send(RequestContext::get("/api/feed/a")).await.unwrap_err();
    assert!(matches!(err, SdkError::PolicyRequired { .. }));
    assert!(!notified.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_plain_forbidden_is_a_client_error() {
    let transport = ScriptedTransport::new(|_| {
        json(403, serde_json::json!({"error": "FORBIDDEN", "message": "not your pet"}))
    });
    let client = client(transport.clone(), logged_in());
    let prompts = collect_prompts(&client);

    let err = client.send(RequestContext::get("/api/pet/5")).await.unwrap_err();

    assert!(matches!(err, SdkError::ClientError { status: 403, .. }));
    assert!(prompts.lock().unwrap().is_empty());
    assert_eq!(transport.calls(), 1);
}
