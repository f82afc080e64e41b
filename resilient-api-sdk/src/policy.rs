//! Compliance gate
//!
//! Some endpoints answer with a "forbidden, action required" status and a
//! machine-readable reason code when the user must first accept a policy
//! (updated terms, a privacy notice, ...). The gate suspends such requests
//! until the application reports the outcome of its prompt.
//!
//! The gate is a two-state machine, `Idle -> AwaitingResolution -> Idle`.
//! The first matching failure opens an episode and notifies subscribers once;
//! further matches during the episode only join the queue. A single
//! resolution drains the whole queue: on acceptance every queued request is
//! replayed in FIFO order, on denial every one is rejected. After an
//! acceptance the gate stays in `AwaitingResolution` until the last replay
//! has settled; requests failing in that window join the tail of the queue
//! being replayed instead of opening a second episode.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::{SdkError, SdkResult};
use crate::transport::ApiResponse;

/// What identifies a compliance response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Response status carrying the requirement
    pub status: u16,
    /// Reason codes in the error envelope that denote a requirement
    pub reason_codes: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            status: 403,
            reason_codes: vec!["POLICY_ACCEPTANCE_REQUIRED".to_string()],
        }
    }
}

impl PolicyConfig {
    pub fn is_reason_code(&self, code: &str) -> bool {
        self.reason_codes.iter().any(|c| c == code)
    }
}

/// One policy the user has to accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequirement {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Presents compliance requirements to the user
pub trait PolicySubscriber: Send + Sync {
    /// Called once per episode. Exactly one of [`PolicyPrompt::resolve`] or
    /// [`PolicyPrompt::deny`] must eventually be called on `prompt` (or any
    /// clone of it) to release the queued requests.
    fn on_policy_required(&self, prompt: PolicyPrompt);
}

impl<F> PolicySubscriber for F
where
    F: Fn(PolicyPrompt) + Send + Sync,
{
    fn on_policy_required(&self, prompt: PolicyPrompt) {
        self(prompt)
    }
}

/// Handle returned by [`PolicyComplianceGate::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The requirement shown to the user, with the callbacks that end the episode
#[derive(Clone)]
pub struct PolicyPrompt {
    pub code: String,
    pub message: String,
    pub requirements: Vec<PolicyRequirement>,
    episode: u64,
    gate: Weak<GateShared>,
}

impl fmt::Debug for PolicyPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyPrompt")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("requirements", &self.requirements)
            .field("episode", &self.episode)
            .finish()
    }
}

impl PolicyPrompt {
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// The user satisfied the requirement: replay every queued request.
    /// Calls after the episode has ended are ignored.
    pub fn resolve(&self) {
        if let Some(gate) = self.gate.upgrade() {
            gate.resolve(self.episode);
        }
    }

    /// The user declined: reject every queued request with `error`, or with
    /// its own originating error when `None`.
    pub fn deny(&self, error: Option<SdkError>) {
        if let Some(gate) = self.gate.upgrade() {
            gate.deny(self.episode, error);
        }
    }
}

/// Re-executes a queued request through the full pipeline
pub type ReplayFn =
    Box<dyn FnOnce(RequestContext) -> BoxFuture<'static, SdkResult<ApiResponse>> + Send>;

struct PendingRequest {
    context: RequestContext,
    error: SdkError,
    replay: ReplayFn,
    responder: oneshot::Sender<SdkResult<ApiResponse>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Idle,
    AwaitingResolution,
}

struct GateState {
    status: GateStatus,
    episode: u64,
    /// The episode was accepted and its queue is being replayed
    replaying: bool,
    queue: VecDeque<PendingRequest>,
}

struct GateShared {
    config: PolicyConfig,
    state: Mutex<GateState>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn PolicySubscriber>)>>,
    next_subscription: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GateShared {
    fn is_open(state: &GateState, episode: u64) -> bool {
        state.status == GateStatus::AwaitingResolution
            && state.episode == episode
            && !state.replaying
    }

    fn resolve(self: &Arc<Self>, episode: u64) {
        {
            let mut state = lock(&self.state);
            if !Self::is_open(&state, episode) {
                debug!("Ignoring resolution for inactive policy episode {}", episode);
                return;
            }
            state.replaying = true;
            info!(
                "Policy requirement resolved, replaying {} queued requests",
                state.queue.len()
            );
        }

        let gate = Arc::clone(self);
        let replays = async move {
            let mut next = gate.next_replay();
            while let Some(pending) = next {
                let outcome = (pending.replay)(pending.context).await;
                // Settle the gate before the last caller observes its result.
                next = gate.next_replay();
                let _ = pending.responder.send(outcome);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(replays);
            }
            Err(_) => {
                warn!("Policy resolved outside a Tokio runtime; queued requests fail with their original error");
                let queue = self.finish_episode();
                reject_all(queue, None);
            }
        }
    }

    /// Next request to replay; returns the gate to `Idle` once the queue is empty
    fn next_replay(&self) -> Option<PendingRequest> {
        let mut state = lock(&self.state);
        let next = state.queue.pop_front();
        if next.is_none() {
            state.status = GateStatus::Idle;
            state.replaying = false;
            debug!("Policy episode {} settled", state.episode);
        }
        next
    }

    fn finish_episode(&self) -> VecDeque<PendingRequest> {
        let mut state = lock(&self.state);
        state.status = GateStatus::Idle;
        state.replaying = false;
        std::mem::take(&mut state.queue)
    }

    fn deny(&self, episode: u64, error: Option<SdkError>) {
        let queue = {
            let mut state = lock(&self.state);
            if !Self::is_open(&state, episode) {
                debug!("Ignoring denial for inactive policy episode {}", episode);
                return;
            }
            state.status = GateStatus::Idle;
            std::mem::take(&mut state.queue)
        };
        warn!("Policy requirement denied, rejecting {} queued requests", queue.len());
        reject_all(queue, error);
    }
}

fn reject_all(queue: VecDeque<PendingRequest>, error: Option<SdkError>) {
    for pending in queue {
        let error = error.clone().unwrap_or(pending.error);
        let _ = pending.responder.send(Err(error));
    }
}

/// Suspends requests that hit a compliance requirement until it is resolved
#[derive(Clone)]
pub struct PolicyComplianceGate {
    shared: Arc<GateShared>,
}

impl PolicyComplianceGate {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            shared: Arc::new(GateShared {
                config,
                state: Mutex::new(GateState {
                    status: GateStatus::Idle,
                    episode: 0,
                    replaying: false,
                    queue: VecDeque::new(),
                }),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.shared.config
    }

    pub fn subscribe(&self, subscriber: Arc<dyn PolicySubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.subscribers).push((id, subscriber));
        id
    }

    /// Returns false when `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.shared.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn has_subscribers(&self) -> bool {
        !lock(&self.shared.subscribers).is_empty()
    }

    pub fn status(&self) -> GateStatus {
        lock(&self.shared.state).status
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// A compliance failure on a request that has not been through the gate,
    /// with someone registered to present it
    pub fn matches(&self, error: &SdkError, context: &RequestContext) -> bool {
        matches!(error, SdkError::PolicyRequired { .. })
            && !context.policy_retry_attempted()
            && self.has_subscribers()
    }

    /// Queue the request until the episode ends and return its final outcome.
    /// Opens an episode and notifies subscribers when the gate is idle.
    pub async fn handle(
        &self,
        error: SdkError,
        context: RequestContext,
        replay: ReplayFn,
    ) -> SdkResult<ApiResponse> {
        let (responder, outcome) = oneshot::channel();

        let prompt = {
            let mut state = lock(&self.shared.state);
            state.queue.push_back(PendingRequest {
                context: context.as_policy_retry(),
                error: error.clone(),
                replay,
                responder,
            });

            match state.status {
                GateStatus::AwaitingResolution => {
                    debug!(
                        "Queued {} {} behind policy episode {}",
                        context.method(),
                        context.path(),
                        state.episode
                    );
                    None
                }
                GateStatus::Idle => {
                    state.status = GateStatus::AwaitingResolution;
                    state.episode += 1;
                    Some(self.prompt_for(&error, state.episode))
                }
            }
        };

        if let Some(prompt) = prompt {
            warn!(
                "Policy acceptance required ({}), opening episode {}",
                prompt.code, prompt.episode
            );
            let subscribers: Vec<Arc<dyn PolicySubscriber>> = lock(&self.shared.subscribers)
                .iter()
                .map(|(_, s)| Arc::clone(s))
                .collect();
            for subscriber in subscribers {
                subscriber.on_policy_required(prompt.clone());
            }
        }

        outcome.await.unwrap_or(Err(error))
    }

    fn prompt_for(&self, error: &SdkError, episode: u64) -> PolicyPrompt {
        let (code, message, requirements) = match error {
            SdkError::PolicyRequired {
                code,
                message,
                requirements,
            } => (code.clone(), message.clone(), requirements.clone()),
            other => (String::new(), other.to_string(), Vec::new()),
        };

        PolicyPrompt {
            code,
            message,
            requirements,
            episode,
            gate: Arc::downgrade(&self.shared),
        }
    }
}

impl Default for PolicyComplianceGate {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
