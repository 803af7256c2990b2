use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum LimiterEvent {
    /// One `check_limit` call completed.
    Check {
        identifier: String,
        limit_type: String,
        allowed: bool,
        /// Wall time spent on the decision, store round-trips included.
        elapsed: Duration,
    },
    /// The counter store failed or timed out during an operation.
    ///
    /// Emitted in addition to resolving the decision per the limit type's
    /// fail mode; store trouble is never silently swallowed.
    StoreUnavailable {
        limit_type: String,
        /// Which operation hit the failure (e.g. "check_and_incr").
        operation: &'static str,
        detail: String,
    },
    /// Adaptive thresholds were re-derived from a fresh behavior score.
    ThresholdsAdjusted {
        identifier: String,
        limit_type: String,
        band: &'static str,
    },
    /// An administrative reset removed counter keys.
    CountersReset {
        identifier: String,
        removed: u64,
    },
    /// The denial monitor signalled an external breaker.
    BreakerTripped {
        breaker: String,
        denial_ratio: f64,
    },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Check { identifier, limit_type, allowed, elapsed } => {
                write!(
                    f,
                    "Check({}/{}, allowed={}, elapsed={:?})",
                    identifier, limit_type, allowed, elapsed
                )
            }
            LimiterEvent::StoreUnavailable { limit_type, operation, detail } => {
                write!(f, "StoreUnavailable({}, op={}, {})", limit_type, operation, detail)
            }
            LimiterEvent::ThresholdsAdjusted { identifier, limit_type, band } => {
                write!(f, "ThresholdsAdjusted({}/{}, band={})", identifier, limit_type, band)
            }
            LimiterEvent::CountersReset { identifier, removed } => {
                write!(f, "CountersReset({}, removed={})", identifier, removed)
            }
            LimiterEvent::BreakerTripped { breaker, denial_ratio } => {
                write!(f, "BreakerTripped({}, ratio={:.2})", breaker, denial_ratio)
            }
        }
    }
}

/// Convert a LimiterEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &LimiterEvent) -> serde_json::Value {
    match event {
        LimiterEvent::Check { identifier, limit_type, allowed, elapsed } => json!({
            "kind": "check",
            "identifier": identifier,
            "limit_type": limit_type,
            "allowed": *allowed,
            "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
        }),
        LimiterEvent::StoreUnavailable { limit_type, operation, detail } => json!({
            "kind": "store_unavailable",
            "limit_type": limit_type,
            "operation": *operation,
            "detail": detail,
        }),
        LimiterEvent::ThresholdsAdjusted { identifier, limit_type, band } => json!({
            "kind": "thresholds_adjusted",
            "identifier": identifier,
            "limit_type": limit_type,
            "band": *band,
        }),
        LimiterEvent::CountersReset { identifier, removed } => json!({
            "kind": "counters_reset",
            "identifier": identifier,
            "removed": *removed,
        }),
        LimiterEvent::BreakerTripped { breaker, denial_ratio } => json!({
            "kind": "breaker_tripped",
            "breaker": breaker,
            "denial_ratio": *denial_ratio,
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_event_display() {
        let event = LimiterEvent::Check {
            identifier: "u1".into(),
            limit_type: "api_calls".into(),
            allowed: false,
            elapsed: Duration::from_millis(2),
        };
        let s = event.to_string();
        assert!(s.contains("Check"));
        assert!(s.contains("u1"));
        assert!(s.contains("allowed=false"));
    }

    #[test]
    fn thresholds_event_display() {
        let event = LimiterEvent::ThresholdsAdjusted {
            identifier: "u1".into(),
            limit_type: "api_calls".into(),
            band: "trusted",
        };
        assert!(event.to_string().contains("band=trusted"));
    }

    #[test]
    fn event_clone_round_trips() {
        let event = LimiterEvent::CountersReset { identifier: "u1".into(), removed: 2 };
        assert_eq!(event.clone(), event);
    }
}
