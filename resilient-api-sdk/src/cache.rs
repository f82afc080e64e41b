//! Short-lived response cache for idempotent reads.
//!
//! Entries expire lazily: an expired entry is dropped when it is next read,
//! there is no background sweep. Concurrent loads of the same key share one
//! in-flight future, so a burst of identical reads costs a single transport
//! call. Writes invalidate by substring match against both the cache key and
//! the request path the entry was loaded from.
//!
//! # Examples
//!
//! ```no_run
//! use resilient_api_sdk::cache::ResponseCache;
//! use std::time::Duration;
//!
//! # async fn example() -> resilient_api_sdk::SdkResult<()> {
//! let cache: ResponseCache<String> = ResponseCache::new(1_000);
//! let value = cache
//!     .get_or_load("pet:5", "/api/pet/5", Duration::from_secs(30), || async {
//!         Ok("Rex".to_string())
//!     })
//!     .await?;
//! cache.invalidate("pet");
//! # Ok(())
//! # }
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{SdkError, SdkResult};

type SharedLoad<V> = Shared<BoxFuture<'static, SdkResult<V>>>;
type InflightMap<V> = DashMap<String, InflightLoad<V>>;

/// A cached value with metadata.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    source: String,
    created_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, source: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            source,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn matches(&self, key: &str, pattern: &str) -> bool {
        key.contains(pattern) || self.source.contains(pattern)
    }
}

/// A load running on its own task, shared by every caller waiting on it
struct InflightLoad<V> {
    id: u64,
    source: String,
    /// Set when an invalidation matched this load; its result is not cached
    stale: Arc<AtomicBool>,
    waiters: Arc<AtomicUsize>,
    abort: AbortHandle,
    load: SharedLoad<V>,
}

impl<V> InflightLoad<V> {
    fn matches(&self, key: &str, pattern: &str) -> bool {
        key.contains(pattern) || self.source.contains(pattern)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }
}

/// Held by each caller awaiting an in-flight load. The last one to leave
/// aborts the load and forgets it, so a cancelled read leaves nothing behind.
struct LoadWaiter<V> {
    key: String,
    id: u64,
    waiters: Arc<AtomicUsize>,
    abort: AbortHandle,
    inflight: Arc<InflightMap<V>>,
}

impl<V> Drop for LoadWaiter<V> {
    fn drop(&mut self) {
        // Joiners register under the map entry, so the count is only
        // decremented there while the load is still joinable.
        let mut counted = false;
        let removed = self
            .inflight
            .remove_if(&self.key, |_, load| {
                if load.id != self.id {
                    return false;
                }
                counted = true;
                self.waiters.fetch_sub(1, Ordering::AcqRel) == 1
            })
            .is_some();
        let last = removed || (!counted && self.waiters.fetch_sub(1, Ordering::AcqRel) == 1);

        if last && !self.abort.is_finished() {
            debug!("Last waiter left, abandoning load for {}", self.key);
            self.abort.abort();
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined a load already in flight
    pub joined_loads: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub current_entries: usize,
    /// Hit rate (0.0 - 1.0).
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined_loads: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

/// TTL cache with in-flight load deduplication
pub struct ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    inflight: Arc<InflightMap<V>>,
    max_entries: usize,
    next_load_id: AtomicU64,
    counters: CacheCounters,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_entries` values
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            next_load_id: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    /// Gets an unexpired value, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Return the cached value for `key`, or run `loader` and cache its
    /// success for `ttl`. Callers arriving while a load for `key` is in
    /// flight await that load instead of starting another. Failures are
    /// shared with every waiter but never cached.
    ///
    /// The load runs on a spawned task. It outlives any single caller and is
    /// abandoned only when every caller waiting on it has gone away.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        source: &str,
        ttl: Duration,
        loader: F,
    ) -> SdkResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<V>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let (load, _waiter) = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight load for {}", key);
                self.counters.joined_loads.fetch_add(1, Ordering::Relaxed);
                let load = entry.get();
                load.waiters.fetch_add(1, Ordering::AcqRel);
                (load.load.clone(), self.waiter(key, load))
            }
            Entry::Vacant(entry) => {
                debug!("Cache miss for {}, loading", key);
                let load = self.start_load(key, source, ttl, loader());
                let waiter = self.waiter(key, &load);
                (entry.insert(load).load.clone(), waiter)
            }
        };

        load.await
    }

    fn waiter(&self, key: &str, load: &InflightLoad<V>) -> LoadWaiter<V> {
        LoadWaiter {
            key: key.to_string(),
            id: load.id,
            waiters: Arc::clone(&load.waiters),
            abort: load.abort.clone(),
            inflight: Arc::clone(&self.inflight),
        }
    }

    fn start_load<Fut>(
        &self,
        key: &str,
        source: &str,
        ttl: Duration,
        fetch: Fut,
    ) -> InflightLoad<V>
    where
        Fut: Future<Output = SdkResult<V>> + Send + 'static,
    {
        let id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
        let stale = Arc::new(AtomicBool::new(false));
        let entries = Arc::clone(&self.entries);
        let inflight = Arc::clone(&self.inflight);
        let max_entries = self.max_entries;
        let task_key = key.to_string();
        let task_source = source.to_string();
        let task_stale = Arc::clone(&stale);

        let task = tokio::spawn(async move {
            let result = fetch.await;

            if let Ok(value) = &result {
                if entries.len() >= max_entries && !entries.contains_key(&task_key) {
                    evict_oldest(&entries);
                }
                // Checked under the entry lock: an invalidation either marks
                // this load before the check or sweeps the entry after it.
                let entry = entries.entry(task_key.clone());
                if task_stale.load(Ordering::SeqCst) {
                    debug!("Discarding load for {} invalidated mid-flight", task_key);
                } else {
                    entry.insert(CacheEntry::new(value.clone(), task_source, ttl));
                }
            }
            inflight.remove_if(&task_key, |_, load| load.id == id);

            result
        });
        let abort = task.abort_handle();
        let load = async move { task.await.unwrap_or_else(|e| Err(SdkError::from(e))) }
            .boxed()
            .shared();

        InflightLoad {
            id,
            source: source.to_string(),
            stale,
            waiters: Arc::new(AtomicUsize::new(1)),
            abort,
            load,
        }
    }

    /// Remove every entry whose key or source path contains `pattern`.
    /// Matching loads still in flight are detached: their current waiters
    /// get the result, but it is not cached and later reads load afresh.
    /// Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.inflight.retain(|key, load| {
            if load.matches(key, pattern) {
                load.mark_stale();
                false
            } else {
                true
            }
        });

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().matches(entry.key(), pattern))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &stale {
            self.entries.remove(key);
        }

        if !stale.is_empty() {
            debug!("Invalidated {} cache entries matching {}", stale.len(), pattern);
        }
        self.counters
            .invalidations
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    /// Clears all entries from the cache.
    pub fn clear(&self) {
        self.inflight.retain(|_, load| {
            load.mark_stale();
            false
        });
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Gets cache statistics.
    pub fn statistics(&self) -> CacheStatistics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStatistics {
            hits,
            misses,
            joined_loads: self.counters.joined_loads.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            current_entries: self.entries.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

fn evict_oldest<V>(entries: &DashMap<String, CacheEntry<V>>) {
    let oldest = entries
        .iter()
        .min_by_key(|entry| entry.value().created_at)
        .map(|entry| entry.key().clone());

    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

/// Cache key for a read: the path followed by its query parameters in sorted order
pub fn cache_key_for(path: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let mut pairs: Vec<&(String, String)> = query.iter().collect();
    pairs.sort();
    let query = pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", path, query)
}

/// Resource family of a request path: the first segment after `api_prefix`.
///
/// `/api/pet/5` with prefix `/api` yields `pet`. Absolute URLs are reduced to
/// their path first.
pub fn resource_family(path: &str, api_prefix: &str) -> Option<String> {
    let parsed;
    let path = match url::Url::parse(path) {
        Ok(url) => {
            parsed = url;
            parsed.path()
        }
        Err(_) => path,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let prefix = api_prefix.trim_end_matches('/');
    let rest = match path.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };

    rest.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{advance, sleep};

    const TTL: Duration = Duration::from_secs(30);

    fn counting_loader(
        count: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, SdkResult<String>> {
        let count = Arc::clone(count);
        move || {
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(value.to_string())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_loader() {
        let cache = ResponseCache::new(100);
        let count = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_load("r1", "/resource/1", TTL, counting_loader(&count, "one"))
            .await
            .unwrap();
        let second = cache
            .get_or_load("r1", "/resource/1", TTL, counting_loader(&count, "other"))
            .await
            .unwrap();

        assert_eq!(first, "one");
        assert_eq!(second, "one");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_reloaded() {
        let cache = ResponseCache::new(100);
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_load("r1", "/resource/1", TTL, counting_loader(&count, "one"))
            .await
            .unwrap();
        advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(cache.get("r1"), None);
        cache
            .get_or_load("r1", "/resource/1", TTL, counting_loader(&count, "two"))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.statistics().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_are_deduplicated() {
        let cache = ResponseCache::new(100);
        let count = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.get_or_load("feed", "/api/feed", TTL, counting_loader(&count, "x")),
            cache.get_or_load("feed", "/api/feed", TTL, counting_loader(&count, "y")),
            cache.get_or_load("feed", "/api/feed", TTL, counting_loader(&count, "z")),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), "x");
        assert_eq!(b.unwrap(), "x");
        assert_eq!(c.unwrap(), "x");
        assert_eq!(cache.statistics().joined_loads, 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache: ResponseCache<String> = ResponseCache::new(100);

        let err = cache
            .get_or_load("r1", "/resource/1", TTL, || async {
                Err(SdkError::ServerError {
                    status: 500,
                    message: "boom".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::ServerError { .. }));
        assert!(cache.is_empty());

        let value = cache
            .get_or_load("r1", "/resource/1", TTL, || async { Ok("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_invalidate_matches_key_and_source() {
        let cache: ResponseCache<String> = ResponseCache::new(100);
        for (key, source) in [
            ("/api/pet/5", "/api/pet/5"),
            ("r1", "/api/pet/7"),
            ("/api/owner/1", "/api/owner/1"),
        ] {
            cache
                .get_or_load(key, source, TTL, || async { Ok("v".to_string()) })
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate("pet"), 2);
        assert_eq!(cache.get("/api/pet/5"), None);
        assert_eq!(cache.get("r1"), None);
        assert_eq!(cache.get("/api/owner/1"), Some("v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_load_discards_result() {
        let cache = Arc::new(ResponseCache::new(100));
        let count = Arc::new(AtomicUsize::new(0));

        let loading = {
            let cache = Arc::clone(&cache);
            let loader = counting_loader(&count, "stale");
            tokio::spawn(async move {
                cache.get_or_load("/api/pet/5", "/api/pet/5", TTL, loader).await
            })
        };
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cache.invalidate("pet");

        assert_eq!(loading.await.unwrap().unwrap(), "stale");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_matches_in_flight_source() {
        let cache = Arc::new(ResponseCache::new(100));
        let count = Arc::new(AtomicUsize::new(0));

        let loading = {
            let cache = Arc::clone(&cache);
            let loader = counting_loader(&count, "before-write");
            tokio::spawn(async move { cache.get_or_load("r1", "/api/pet/5", TTL, loader).await })
        };
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cache.invalidate("pet");

        // A read after the write must not join the detached load.
        let fresh = cache
            .get_or_load("r1", "/api/pet/5", TTL, counting_loader(&count, "after-write"))
            .await
            .unwrap();
        assert_eq!(fresh, "after-write");
        assert_eq!(loading.await.unwrap().unwrap(), "before-write");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.statistics().joined_loads, 0);
        assert_eq!(cache.get("r1"), Some("after-write".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_spares_unrelated_in_flight_load() {
        let cache = Arc::new(ResponseCache::new(100));
        let count = Arc::new(AtomicUsize::new(0));

        let loading = {
            let cache = Arc::clone(&cache);
            let loader = counting_loader(&count, "owner");
            tokio::spawn(async move {
                cache.get_or_load("/api/owner/1", "/api/owner/1", TTL, loader).await
            })
        };
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cache.invalidate("pet");

        assert_eq!(loading.await.unwrap().unwrap(), "owner");
        assert_eq!(cache.get("/api/owner/1"), Some("owner".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sole_waiter_abandons_load() {
        let cache = Arc::new(ResponseCache::new(100));
        let count = Arc::new(AtomicUsize::new(0));

        let loading = {
            let cache = Arc::clone(&cache);
            let loader = counting_loader(&count, "abandoned");
            tokio::spawn(async move { cache.get_or_load("r1", "/resource/1", TTL, loader).await })
        };
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        loading.abort();
        assert!(loading.await.unwrap_err().is_cancelled());
        sleep(Duration::from_millis(100)).await;

        assert!(cache.is_empty());
        let value = cache
            .get_or_load("r1", "/resource/1", TTL, counting_loader(&count, "fresh"))
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.statistics().joined_loads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_survives_while_any_waiter_remains() {
        let cache = Arc::new(ResponseCache::new(100));
        let count = Arc::new(AtomicUsize::new(0));

        let spawn_reader = |value: &'static str| {
            let cache = Arc::clone(&cache);
            let loader = counting_loader(&count, value);
            tokio::spawn(async move { cache.get_or_load("r1", "/resource/1", TTL, loader).await })
        };
        let first = spawn_reader("shared");
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = spawn_reader("unused");
        while cache.statistics().joined_loads == 0 {
            tokio::task::yield_now().await;
        }

        first.abort();
        assert_eq!(second.await.unwrap().unwrap(), "shared");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("r1"), Some("shared".to_string()));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache: ResponseCache<String> = ResponseCache::new(2);
        for key in ["a", "b", "c"] {
            cache
                .get_or_load(key, key, TTL, move || async move { Ok(key.to_string()) })
                .await
                .unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c"), Some("c".to_string()));
    }

    #[test]
    fn test_cache_key_sorts_query() {
        let query = vec![
            ("species".to_string(), "dog".to_string()),
            ("limit".to_string(), "10".to_string()),
        ];
        assert_eq!(
            cache_key_for("/api/pet", &query),
            "/api/pet?limit=10&species=dog"
        );
        assert_eq!(cache_key_for("/api/pet", &[]), "/api/pet");
    }

    #[test]
    fn test_resource_family() {
        assert_eq!(resource_family("/api/pet/5", "/api").as_deref(), Some("pet"));
        assert_eq!(resource_family("/api/pet", "/api/").as_deref(), Some("pet"));
        assert_eq!(
            resource_family("https://example.com/api/owner/2?x=1", "/api").as_deref(),
            Some("owner")
        );
        assert_eq!(resource_family("/resource/1", "/api").as_deref(), Some("resource"));
        assert_eq!(resource_family("/api", "/api"), None);
        assert_eq!(resource_family("/apiary/1", "/api").as_deref(), Some("apiary"));
    }
}
