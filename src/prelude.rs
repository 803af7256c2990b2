//! Convenient re-exports for common floodgate types.
pub use crate::{
    adaptive::{AdaptiveConfig, AdaptiveMultipliers, BehaviorScorer, ThresholdEngine, TrustBand},
    breaker::{BreakerTrigger, DenialMonitor, DenialMonitorConfig},
    error::{AdminError, ConfigError, LimiterError, StoreError},
    key::{LimitType, RateLimitKey, RequestContext},
    limiter::{RateLimitResult, RateLimitService, StatusReport, WindowStatus},
    middleware::{KeyExtractor, RateLimitLayer},
    policy::{FailMode, LimitPolicy, PolicyRegistry, Window, WindowConfig},
    store::{CounterStore, InMemoryCounterStore, WindowSample},
    telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    Clock, DynamicConfig, SystemClock,
};
