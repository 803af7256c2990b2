//! Telemetry for rate-limit decisions.
//!
//! Every public operation emits a structured event describing what
//! happened. Events flow through `TelemetrySink` implementations which can
//! log, aggregate, or forward them to external collectors. Emission is
//! strictly fire-and-forget: a slow or failing sink can never block or
//! fail a rate-limit decision.

pub mod events;
pub mod sinks;

pub use events::LimiterEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
