//! Keyed cancellation
//!
//! Each key owns at most one live token. Registering a key that is still
//! active cancels the previous holder first, so superseded requests resolve
//! with [`SdkError::Cancelled`](crate::SdkError::Cancelled) instead of
//! lingering.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maps caller-supplied keys to the token of the request currently using them
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: DashMap<String, (u64, CancellationToken)>,
    next_id: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a new request, cancelling any request still holding it
    pub fn register(&self, key: &str) -> CancellationGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some((_, previous)) = self.tokens.insert(key.to_string(), (id, token.clone())) {
            debug!("Cancelling superseded request under key {}", key);
            previous.cancel();
        }

        CancellationGuard {
            registry: self,
            key: key.to_string(),
            id,
            token,
        }
    }

    /// Cancel the request holding `key`. Returns false when none is active.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tokens.remove(key) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered request
    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.tokens.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn release(&self, key: &str, id: u64) {
        self.tokens.remove_if(key, |_, (entry_id, _)| *entry_id == id);
    }
}

/// Holds a key for the lifetime of one request; releases it on drop unless a
/// newer request has claimed the key since
#[derive(Debug)]
pub struct CancellationGuard<'a> {
    registry: &'a CancellationRegistry,
    key: String,
    id: u64,
    token: CancellationToken,
}

impl CancellationGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CancellationGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}
