//! Process-local dedupe fast path (Layer A)
//!
//! Two short-TTL maps keyed by identity key: an in-flight set and a
//! recent-success map whose stored response is replayed verbatim. This layer
//! is best-effort; the persistent ledger (Layer B) remains the cross-process
//! source of truth. The cache is constructed once per process with an
//! injectable clock so tests control time deterministically.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source for TTL decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Response summary replayed on a recent-success hit
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub late_post_id: String,
    pub response: serde_json::Value,
}

/// Outcome of a fast-path lookup
#[derive(Debug)]
pub enum CacheLookup {
    /// No hit; the key is now marked in-flight by this request
    Miss,
    /// An identical operation started within the TTL and has not finished
    InFlight,
    /// An identical operation completed within the TTL
    Recent(CachedResult),
}

struct CacheInner {
    in_flight: HashMap<String, Instant>,
    recent: HashMap<String, (Instant, CachedResult)>,
}

pub struct DedupeCache {
    ttl: Duration,
    clock: Box<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            inner: Mutex::new(CacheInner {
                in_flight: HashMap::new(),
                recent: HashMap::new(),
            }),
        }
    }

    /// Look up `key`, pruning expired entries first. On a miss the key is
    /// atomically marked in-flight for this request.
    pub fn begin(&self, key: &str) -> CacheLookup {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("dedupe cache lock poisoned");

        let ttl = self.ttl;
        inner
            .in_flight
            .retain(|_, started| now.duration_since(*started) < ttl);
        inner
            .recent
            .retain(|_, (at, _)| now.duration_since(*at) < ttl);

        if let Some((_, result)) = inner.recent.get(key) {
            return CacheLookup::Recent(result.clone());
        }
        if inner.in_flight.contains_key(key) {
            return CacheLookup::InFlight;
        }

        inner.in_flight.insert(key.to_string(), now);
        CacheLookup::Miss
    }

    /// Record a successful publish: the key leaves the in-flight set and its
    /// response becomes replayable until the TTL expires.
    pub fn complete(&self, key: &str, result: CachedResult) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("dedupe cache lock poisoned");
        inner.in_flight.remove(key);
        inner.recent.insert(key.to_string(), (now, result));
    }

    /// Drop all trace of `key` (failure path; symmetric with the ledger
    /// release).
    pub fn clear(&self, key: &str) {
        let mut inner = self.inner.lock().expect("dedupe cache lock poisoned");
        inner.in_flight.remove(key);
        inner.recent.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Clock advanced manually by tests
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for Arc<ManualClock> {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn cache_with_manual_clock(ttl_secs: u64) -> (DedupeCache, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cache = DedupeCache::with_clock(
            Duration::from_secs(ttl_secs),
            Box::new(Arc::clone(&clock)),
        );
        (cache, clock)
    }

    fn result(id: &str) -> CachedResult {
        CachedResult {
            late_post_id: id.to_string(),
            response: serde_json::json!({ "post": { "latePostId": id } }),
        }
    }

    #[test]
    fn miss_marks_in_flight() {
        let (cache, _) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
        assert!(matches!(cache.begin("k"), CacheLookup::InFlight));
    }

    #[test]
    fn complete_replays_the_stored_response() {
        let (cache, _) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
        cache.complete("k", result("post-1"));

        match cache.begin("k") {
            CacheLookup::Recent(r) => assert_eq!(r.late_post_id, "post-1"),
            other => panic!("expected Recent, got {:?}", other),
        }
    }

    #[test]
    fn entries_expire_after_the_ttl() {
        let (cache, clock) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
        cache.complete("k", result("post-1"));

        clock.advance(Duration::from_secs(31));
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
    }

    #[test]
    fn stale_in_flight_entries_are_pruned() {
        let (cache, clock) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));

        // A crashed request's in-flight mark stops blocking after the TTL
        clock.advance(Duration::from_secs(31));
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
    }

    #[test]
    fn clear_is_symmetric_with_failure() {
        let (cache, _) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
        cache.clear("k");
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));

        cache.complete("k", result("post-1"));
        cache.clear("k");
        assert!(matches!(cache.begin("k"), CacheLookup::Miss));
    }

    #[test]
    fn keys_are_independent() {
        let (cache, _) = cache_with_manual_clock(30);
        assert!(matches!(cache.begin("a"), CacheLookup::Miss));
        assert!(matches!(cache.begin("b"), CacheLookup::Miss));
        cache.complete("a", result("post-a"));
        assert!(matches!(cache.begin("b"), CacheLookup::InFlight));
        assert!(matches!(cache.begin("a"), CacheLookup::Recent(_)));
    }
}
