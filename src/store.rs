//! Counter-store abstraction and the in-memory backend.
//!
//! The store is the only shared mutable state in the system. The contract
//! that matters is [`CounterStore::check_and_incr`]: one atomic round trip
//! that reads the count, conditionally increments, and sets the window TTL
//! only when the increment creates the key. Separate GET+INCR+EXPIRE calls
//! would race under concurrent callers (TOCTOU between check and count) and
//! refreshing the TTL on every increment would turn the fixed window into a
//! window that never closes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

#[cfg(feature = "redis")]
pub mod redis;

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSample {
    /// Whether the request fit under the limit (`count_before < limit`).
    pub allowed: bool,
    /// Count observed before this call's increment (if any).
    pub count_before: u64,
    /// Seconds until the window closes.
    pub ttl_secs: u64,
}

/// Abstract storage interface for window counters and adaptive-config
/// records.
///
/// Implementations must make `check_and_incr` atomic with respect to
/// concurrent callers of the same key: no lost increments, no double TTLs
/// on concurrent first-increments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically read the counter, increment it if under `limit`, and set
    /// the expiry to `window_secs` only when this increment created the
    /// key. Denied calls must not increment.
    async fn check_and_incr(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowSample, StoreError>;

    /// Read `(count, ttl_secs)` without incrementing. This is a separate
    /// code path from `check_and_incr` so status queries never count
    /// against the limit. `None` if the key does not exist.
    async fn peek(&self, key: &str) -> Result<Option<(u64, u64)>, StoreError>;

    /// Delete every key starting with `prefix`; returns how many were
    /// removed (reported for audit).
    async fn delete_prefixed(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Read all fields of a hash record. Empty map if absent or expired.
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Overwrite a hash record's fields and set its expiry.
    async fn write_fields(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct CounterCell {
    count: u64,
    expires_at_millis: u64,
}

#[derive(Debug, Clone)]
struct HashCell {
    fields: HashMap<String, String>,
    expires_at_millis: u64,
}

/// In-memory counter store.
///
/// A single mutex around the whole map makes every operation atomic, which
/// is exactly the guarantee distributed backends provide via server-side
/// scripting. Suitable for tests and single-process deployments; it does
/// not share state across processes.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, CounterCell>>>,
    hashes: Arc<Mutex<HashMap<String, HashCell>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use an injected clock (deterministic window expiry in tests).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            hashes: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn remaining_secs(expires_at_millis: u64, now: u64) -> u64 {
        (expires_at_millis.saturating_sub(now) + 999) / 1000
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_incr(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowSample, StoreError> {
        let now = self.clock.now_millis();
        let mut counters = self.counters.lock().expect("counter store poisoned");

        if counters.get(key).is_some_and(|cell| cell.expires_at_millis <= now) {
            counters.remove(key);
        }

        match counters.get_mut(key) {
            Some(cell) => {
                let count_before = cell.count;
                let allowed = count_before < u64::from(limit);
                if allowed {
                    // TTL untouched: the window closes when it was opened
                    // to close, not `window_secs` after the last request.
                    cell.count += 1;
                }
                Ok(WindowSample {
                    allowed,
                    count_before,
                    ttl_secs: Self::remaining_secs(cell.expires_at_millis, now),
                })
            }
            None => {
                let allowed = limit > 0;
                if allowed {
                    counters.insert(
                        key.to_string(),
                        CounterCell { count: 1, expires_at_millis: now + window_secs * 1000 },
                    );
                }
                Ok(WindowSample { allowed, count_before: 0, ttl_secs: window_secs })
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<(u64, u64)>, StoreError> {
        let now = self.clock.now_millis();
        let counters = self.counters.lock().expect("counter store poisoned");
        Ok(counters
            .get(key)
            .filter(|cell| cell.expires_at_millis > now)
            .map(|cell| (cell.count, Self::remaining_secs(cell.expires_at_millis, now))))
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let mut counters = self.counters.lock().expect("counter store poisoned");
        let mut removed = 0u64;
        counters.retain(|key, cell| {
            if cell.expires_at_millis <= now {
                return false;
            }
            if key.starts_with(prefix) {
                removed += 1;
                return false;
            }
            true
        });
        Ok(removed)
    }

    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = self.clock.now_millis();
        let hashes = self.hashes.lock().expect("counter store poisoned");
        Ok(hashes
            .get(key)
            .filter(|cell| cell.expires_at_millis > now)
            .map(|cell| cell.fields.clone())
            .unwrap_or_default())
    }

    async fn write_fields(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut hashes = self.hashes.lock().expect("counter store poisoned");
        hashes.insert(
            key.to_string(),
            HashCell {
                fields: fields.iter().cloned().collect(),
                expires_at_millis: now + ttl_secs * 1000,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(1_000_000)) }
        }

        fn advance_secs(&self, secs: u64) {
            self.now.fetch_add(secs * 1000, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn store_with_clock() -> (InMemoryCounterStore, ManualClock) {
        let clock = ManualClock::new();
        (InMemoryCounterStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn counts_up_to_limit_then_denies() {
        let (store, _clock) = store_with_clock();

        for expected_before in 0..3u64 {
            let sample = store.check_and_incr("k", 3, 60).await.unwrap();
            assert!(sample.allowed);
            assert_eq!(sample.count_before, expected_before);
        }

        let sample = store.check_and_incr("k", 3, 60).await.unwrap();
        assert!(!sample.allowed);
        assert_eq!(sample.count_before, 3);
    }

    #[tokio::test]
    async fn denied_calls_do_not_increment() {
        let (store, _clock) = store_with_clock();
        let _ = store.check_and_incr("k", 1, 60).await.unwrap();

        for _ in 0..5 {
            let sample = store.check_and_incr("k", 1, 60).await.unwrap();
            assert!(!sample.allowed);
            assert_eq!(sample.count_before, 1, "denied calls must not count");
        }
    }

    #[tokio::test]
    async fn ttl_is_set_once_per_window_not_refreshed() {
        let (store, clock) = store_with_clock();

        let first = store.check_and_incr("k", 100, 60).await.unwrap();
        assert_eq!(first.ttl_secs, 60);

        clock.advance_secs(40);
        let later = store.check_and_incr("k", 100, 60).await.unwrap();
        assert_eq!(later.ttl_secs, 20, "increments must not extend the window");

        clock.advance_secs(21);
        let fresh = store.check_and_incr("k", 100, 60).await.unwrap();
        assert_eq!(fresh.count_before, 0, "window closed; counter restarts");
        assert_eq!(fresh.ttl_secs, 60);
    }

    #[tokio::test]
    async fn expiry_resets_a_denied_key() {
        let (store, clock) = store_with_clock();
        let _ = store.check_and_incr("k", 1, 60).await.unwrap();
        assert!(!store.check_and_incr("k", 1, 60).await.unwrap().allowed);

        clock.advance_secs(61);
        assert!(store.check_and_incr("k", 1, 60).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn peek_does_not_count_or_create() {
        let (store, _clock) = store_with_clock();
        assert_eq!(store.peek("k").await.unwrap(), None);

        let _ = store.check_and_incr("k", 5, 60).await.unwrap();
        for _ in 0..100 {
            let (count, ttl) = store.peek("k").await.unwrap().expect("key exists");
            assert_eq!(count, 1);
            assert!(ttl <= 60);
        }

        let sample = store.check_and_incr("k", 5, 60).await.unwrap();
        assert_eq!(sample.count_before, 1, "peeks must not have counted");
    }

    #[tokio::test]
    async fn peek_hides_expired_keys() {
        let (store, clock) = store_with_clock();
        let _ = store.check_and_incr("k", 5, 60).await.unwrap();
        clock.advance_secs(61);
        assert_eq!(store.peek("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_prefixed_counts_matches_only() {
        let (store, _clock) = store_with_clock();
        let _ = store.check_and_incr("rate_limit:a:api_calls:minute", 5, 60).await.unwrap();
        let _ = store.check_and_incr("rate_limit:a:api_calls:hour", 5, 3600).await.unwrap();
        let _ = store.check_and_incr("rate_limit:b:api_calls:minute", 5, 60).await.unwrap();

        let removed = store.delete_prefixed("rate_limit:a:").await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(store.peek("rate_limit:a:api_calls:minute").await.unwrap(), None);
        assert!(store.peek("rate_limit:b:api_calls:minute").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_prefixed_ignores_expired_keys() {
        let (store, clock) = store_with_clock();
        let _ = store.check_and_incr("rate_limit:a:x:minute", 5, 60).await.unwrap();
        clock.advance_secs(61);
        let removed = store.delete_prefixed("rate_limit:a:").await.unwrap();
        assert_eq!(removed, 0, "expired keys are not reported as removed");
    }

    #[tokio::test]
    async fn hash_fields_round_trip_and_expire() {
        let (store, clock) = store_with_clock();
        let fields =
            vec![("minute".to_string(), "1.5".to_string()), ("hour".to_string(), "1.8".to_string())];
        store.write_fields("adaptive:u:api_calls", &fields, 120).await.unwrap();

        let read = store.read_fields("adaptive:u:api_calls").await.unwrap();
        assert_eq!(read.get("minute").map(String::as_str), Some("1.5"));
        assert_eq!(read.len(), 2);

        clock.advance_secs(121);
        assert!(store.read_fields("adaptive:u:api_calls").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_increments_are_never_lost() {
        let store = InMemoryCounterStore::new();
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.check_and_incr("k", 1_000, 60).await.unwrap() })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().allowed);
        }

        let (count, _) = store.peek("k").await.unwrap().expect("key exists");
        assert_eq!(count, 64);
    }
}
