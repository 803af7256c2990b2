//! Denial-rate monitoring and the trip signal for an external circuit
//! breaker.
//!
//! Sustained rate-limit exhaustion across many identifiers usually means
//! systemic abuse or a misconfigured upstream client; shedding load at the
//! breaker is coarser and cheaper than per-identifier denial. The breaker
//! itself (Closed → Open → HalfOpen state machine) lives outside this
//! crate — this module only decides *when* to pull the cord.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::key::LimitType;

/// External circuit breaker consuming trip signals.
pub trait BreakerTrigger: Send + Sync + std::fmt::Debug {
    fn trip(&self, name: &str, failure_threshold: f64, recovery_timeout: Duration);
}

/// Validated configuration for the denial monitor.
#[derive(Debug, Clone)]
pub struct DenialMonitorConfig {
    monitoring_window: Duration,
    min_samples: u64,
    trip_ratio: f64,
    recovery_timeout: Duration,
}

impl DenialMonitorConfig {
    /// Create a config with validation: the ratio must lie in `(0, 1]` and
    /// at least one sample is required before a ratio means anything.
    pub fn new(
        monitoring_window: Duration,
        min_samples: u64,
        trip_ratio: f64,
        recovery_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if trip_ratio.is_nan() || trip_ratio <= 0.0 || trip_ratio > 1.0 {
            return Err(ConfigError::InvalidTripRatio { provided: trip_ratio });
        }
        Ok(Self {
            monitoring_window,
            min_samples: min_samples.max(1),
            trip_ratio,
            recovery_timeout,
        })
    }

    pub fn trip_ratio(&self) -> f64 {
        self.trip_ratio
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }
}

impl Default for DenialMonitorConfig {
    fn default() -> Self {
        Self {
            monitoring_window: Duration::from_secs(10),
            min_samples: 10,
            trip_ratio: 0.5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct DenialCell {
    window_started_millis: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    tripped: AtomicBool,
}

/// A trip that was just signalled; surfaced so the caller can report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tripped {
    pub breaker: String,
    pub denial_ratio: f64,
}

/// Rolling per-limit-type denial ratio over a monitoring window.
///
/// Counters are lock-free atomics; the registry lock is only taken to
/// create a cell the first time a limit type is seen. Window rollover is a
/// CAS race where one caller wins the reset; late recorders may land a
/// sample in the wrong window, which is fine for a coarse abuse signal.
#[derive(Debug)]
pub struct DenialMonitor {
    trigger: Arc<dyn BreakerTrigger>,
    config: DenialMonitorConfig,
    clock: Arc<dyn Clock>,
    cells: RwLock<HashMap<String, Arc<DenialCell>>>,
}

impl DenialMonitor {
    pub fn new(trigger: Arc<dyn BreakerTrigger>, config: DenialMonitorConfig) -> Self {
        Self::with_clock(trigger, config, Arc::new(SystemClock))
    }

    /// Override the clock (deterministic window rollover in tests).
    pub fn with_clock(
        trigger: Arc<dyn BreakerTrigger>,
        config: DenialMonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { trigger, config, clock, cells: RwLock::new(HashMap::new()) }
    }

    /// Record one decision outcome. Returns the trip signal if this sample
    /// pushed the denial ratio over the threshold.
    pub fn record(&self, limit_type: &LimitType, allowed: bool) -> Option<Tripped> {
        let cell = self.cell_for(limit_type);
        let now = self.clock.now_millis();
        let window_ms = self.config.monitoring_window.as_millis() as u64;

        let started = cell.window_started_millis.load(Ordering::Acquire);
        if now.saturating_sub(started) >= window_ms
            && cell
                .window_started_millis
                .compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // We won the rollover race; start a fresh window and re-arm.
            cell.allowed.store(0, Ordering::Release);
            cell.denied.store(0, Ordering::Release);
            cell.tripped.store(false, Ordering::Release);
        }

        if allowed {
            cell.allowed.fetch_add(1, Ordering::AcqRel);
            return None;
        }
        let denied = cell.denied.fetch_add(1, Ordering::AcqRel) + 1;
        let total = denied + cell.allowed.load(Ordering::Acquire);

        if total < self.config.min_samples {
            return None;
        }
        let ratio = denied as f64 / total as f64;
        if ratio <= self.config.trip_ratio {
            return None;
        }
        if cell.tripped.swap(true, Ordering::AcqRel) {
            return None; // already signalled this window
        }

        let breaker = format!("rate_limiting_{}", limit_type.as_str());
        tracing::warn!(
            breaker = %breaker,
            denial_ratio = ratio,
            denied,
            total,
            "denial rate over threshold; tripping breaker"
        );
        self.trigger.trip(&breaker, self.config.trip_ratio, self.config.recovery_timeout);
        Some(Tripped { breaker, denial_ratio: ratio })
    }

    fn cell_for(&self, limit_type: &LimitType) -> Arc<DenialCell> {
        {
            let cells = self.cells.read().expect("denial monitor poisoned");
            if let Some(cell) = cells.get(limit_type.as_str()) {
                return cell.clone();
            }
        }
        let mut cells = self.cells.write().expect("denial monitor poisoned");
        cells
            .entry(limit_type.as_str().to_string())
            .or_insert_with(|| {
                let cell = DenialCell::default();
                cell.window_started_millis.store(self.clock.now_millis(), Ordering::Release);
                Arc::new(cell)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingTrigger {
        trips: Mutex<Vec<(String, f64, Duration)>>,
    }

    impl BreakerTrigger for RecordingTrigger {
        fn trip(&self, name: &str, failure_threshold: f64, recovery_timeout: Duration) {
            self.trips.lock().unwrap().push((
                name.to_string(),
                failure_threshold,
                recovery_timeout,
            ));
        }
    }

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(1_000_000)) }
        }

        fn advance_millis(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn monitor() -> (DenialMonitor, Arc<RecordingTrigger>, ManualClock) {
        let trigger = Arc::new(RecordingTrigger::default());
        let clock = ManualClock::new();
        let monitor = DenialMonitor::with_clock(
            trigger.clone(),
            DenialMonitorConfig::default(),
            Arc::new(clock.clone()),
        );
        (monitor, trigger, clock)
    }

    #[test]
    fn rejects_invalid_trip_ratio() {
        let err = DenialMonitorConfig::new(
            Duration::from_secs(10),
            10,
            0.0,
            Duration::from_secs(30),
        )
        .expect_err("zero ratio is invalid");
        assert!(matches!(err, ConfigError::InvalidTripRatio { .. }));

        assert!(DenialMonitorConfig::new(
            Duration::from_secs(10),
            10,
            1.5,
            Duration::from_secs(30),
        )
        .is_err());
    }

    #[test]
    fn no_trip_below_min_samples() {
        let (monitor, trigger, _clock) = monitor();
        for _ in 0..9 {
            assert_eq!(monitor.record(&LimitType::ApiCalls, false), None);
        }
        assert!(trigger.trips.lock().unwrap().is_empty());
    }

    #[test]
    fn trips_once_ratio_exceeds_threshold() {
        let (monitor, trigger, _clock) = monitor();
        for _ in 0..4 {
            monitor.record(&LimitType::ApiCalls, true);
        }
        for i in 0..6 {
            let tripped = monitor.record(&LimitType::ApiCalls, false);
            if i < 5 {
                assert_eq!(tripped, None, "ratio not yet over 0.5");
            } else {
                // 6 denied / 10 total = 0.6
                let tripped = tripped.expect("should trip");
                assert_eq!(tripped.breaker, "rate_limiting_api_calls");
                assert!((tripped.denial_ratio - 0.6).abs() < 1e-9);
            }
        }

        let trips = trigger.trips.lock().unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].0, "rate_limiting_api_calls");
        assert!((trips[0].1 - 0.5).abs() < 1e-9);
        assert_eq!(trips[0].2, Duration::from_secs(30));
    }

    #[test]
    fn one_trip_per_window_then_rearms_on_rollover() {
        let (monitor, trigger, clock) = monitor();
        for _ in 0..20 {
            monitor.record(&LimitType::Authentication, false);
        }
        assert_eq!(trigger.trips.lock().unwrap().len(), 1, "one signal per window");

        clock.advance_millis(10_001);
        for _ in 0..20 {
            monitor.record(&LimitType::Authentication, false);
        }
        assert_eq!(trigger.trips.lock().unwrap().len(), 2, "re-armed after rollover");
    }

    #[test]
    fn allowed_heavy_traffic_never_trips() {
        let (monitor, trigger, _clock) = monitor();
        for _ in 0..100 {
            monitor.record(&LimitType::ApiCalls, true);
        }
        for _ in 0..50 {
            monitor.record(&LimitType::ApiCalls, false);
        }
        // 50 denied / 150 total = 0.33 < 0.5
        assert!(trigger.trips.lock().unwrap().is_empty());
    }

    #[test]
    fn limit_types_are_tracked_independently() {
        let (monitor, trigger, _clock) = monitor();
        for _ in 0..20 {
            monitor.record(&LimitType::ApiCalls, false);
            monitor.record(&LimitType::Authentication, true);
        }
        let trips = trigger.trips.lock().unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].0, "rate_limiting_api_calls");
    }
}
