//! Clock abstractions used by window accounting and the denial monitor.

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// Window TTLs and the denial monitor work in milliseconds; `reset_at`
/// values reported to callers are wall-clock epoch seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;

    /// Wall-clock seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: subject to NTP adjustment; counters live in the external store
/// with server-side TTLs, so local clock skew only affects reported
/// `reset_at` values, never the counting itself.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
