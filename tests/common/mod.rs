#![allow(dead_code)]

use async_trait::async_trait;
use floodgate::{BreakerTrigger, Clock, CounterStore, StoreError, WindowSample};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic clock shared between a store and the service under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Arc::new(AtomicU64::new(10_000_000)) }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.now.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A store that is permanently down.
#[derive(Debug, Default, Clone)]
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn check_and_incr(
        &self,
        _key: &str,
        _limit: u32,
        _window_secs: u64,
    ) -> Result<WindowSample, StoreError> {
        Err(StoreError::Backend("injected outage".into()))
    }

    async fn peek(&self, _key: &str) -> Result<Option<(u64, u64)>, StoreError> {
        Err(StoreError::Backend("injected outage".into()))
    }

    async fn delete_prefixed(&self, _prefix: &str) -> Result<u64, StoreError> {
        Err(StoreError::Backend("injected outage".into()))
    }

    async fn read_fields(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Err(StoreError::Backend("injected outage".into()))
    }

    async fn write_fields(
        &self,
        _key: &str,
        _fields: &[(String, String)],
        _ttl_secs: u64,
    ) -> Result<(), StoreError> {
        Err(StoreError::Backend("injected outage".into()))
    }
}

/// A store that answers only after a long pause, to exercise deadlines.
#[derive(Debug, Clone)]
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl CounterStore for SlowStore {
    async fn check_and_incr(
        &self,
        _key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowSample, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(WindowSample { allowed: limit > 0, count_before: 0, ttl_secs: window_secs })
    }

    async fn peek(&self, _key: &str) -> Result<Option<(u64, u64)>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn delete_prefixed(&self, _prefix: &str) -> Result<u64, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(0)
    }

    async fn read_fields(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(HashMap::new())
    }

    async fn write_fields(
        &self,
        _key: &str,
        _fields: &[(String, String)],
        _ttl_secs: u64,
    ) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Records trips instead of driving a real breaker.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    trips: Mutex<Vec<(String, f64, Duration)>>,
}

impl RecordingTrigger {
    pub fn trips(&self) -> Vec<(String, f64, Duration)> {
        self.trips.lock().unwrap().clone()
    }
}

impl BreakerTrigger for RecordingTrigger {
    fn trip(&self, name: &str, failure_threshold: f64, recovery_timeout: Duration) {
        self.trips.lock().unwrap().push((name.to_string(), failure_threshold, recovery_timeout));
    }
}

/// Give spawned fire-and-forget telemetry tasks a chance to land.
pub async fn drain_telemetry() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
