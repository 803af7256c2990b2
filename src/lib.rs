#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Floodgate
//!
//! Adaptive, distributed rate limiting for async Rust: simultaneous
//! minute/hour/day windows per identifier, trust-score-driven thresholds,
//! atomic distributed counting, and a denial-rate signal for an external
//! circuit breaker.
//!
//! ## Features
//!
//! - **Multi-window limits** evaluated in a fixed, reproducible order
//! - **Adaptive thresholds** derived from a behavior score with 24 h decay
//! - **Atomic check-and-increment** against a pluggable counter store
//!   (in-memory, or Redis behind the `redis` feature)
//! - **Contextual key fragmentation** by IP, user-agent hash, and country
//! - **Fail-open / fail-closed** per limit type when the store is down
//! - **Breaker signaling** when denial rates indicate systemic abuse
//!
//! ## Quick Start
//!
//! ```rust
//! use floodgate::{InMemoryCounterStore, LimitType, RateLimitService, RequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimitService::new(Arc::new(InMemoryCounterStore::new()));
//!
//!     let ctx = RequestContext::new().with_ip("203.0.113.7");
//!     let decision = limiter
//!         .check_limit("user-42", &LimitType::ApiCalls, &ctx)
//!         .await
//!         .expect("valid policy");
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod adaptive;
pub mod breaker;
pub mod clock;
pub mod dynamic;
pub mod error;
pub mod key;
pub mod limiter;
pub mod middleware;
pub mod policy;
pub mod prelude;
pub mod store;
pub mod telemetry;

// Re-exports
pub use adaptive::{AdaptiveConfig, AdaptiveMultipliers, BehaviorScorer, ThresholdEngine, TrustBand};
pub use breaker::{BreakerTrigger, DenialMonitor, DenialMonitorConfig};
pub use clock::{Clock, SystemClock};
pub use dynamic::DynamicConfig;
pub use error::{AdminError, ConfigError, LimiterError, StoreError};
pub use key::{LimitType, RateLimitKey, RequestContext};
pub use limiter::{RateLimitResult, RateLimitService, StatusReport, WindowStatus};
pub use middleware::{EnforcedService, KeyExtractor, RateLimitLayer};
pub use policy::{FailMode, LimitPolicy, PolicyRegistry, Window, WindowConfig};
pub use store::{CounterStore, InMemoryCounterStore, WindowSample};
pub use telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink};

#[cfg(feature = "redis")]
pub use store::redis::RedisCounterStore;
