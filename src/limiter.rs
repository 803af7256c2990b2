//! Multi-window rate-limit evaluation and the status/admin surface.
//!
//! `RateLimitService` is a stateless service object: every durable counter
//! lives in the injected store, and per-call state dies with the call.
//! Construct it once with its collaborators and share it freely.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adaptive::{AdaptiveConfig, AdaptiveMultipliers, BehaviorScorer, ThresholdEngine};
use crate::breaker::DenialMonitor;
use crate::clock::{Clock, SystemClock};
use crate::dynamic::DynamicConfig;
use crate::error::{AdminError, ConfigError, StoreError};
use crate::key::{self, LimitType, RateLimitKey, RequestContext};
use crate::policy::{FailMode, PolicyRegistry, Window};
use crate::store::CounterStore;
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TelemetrySink};

/// Default bound on each store round trip. A slow store is treated as an
/// unavailable store; fast deny-on-timeout beats mid-flight cancellation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Retry hint when a fail-closed limit type denies because the store could
/// not answer. The counter state is unknown, so suggest a short pause
/// rather than a full window.
const STORE_UNAVAILABLE_RETRY: Duration = Duration::from_secs(1);

/// Decision returned by [`RateLimitService::check_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Denied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// First window (in minute → hour → day order) that was exceeded.
        violating_window: Window,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-window detail in a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    pub window: Window,
    pub allowed: bool,
    pub current_count: u64,
    pub limit: u32,
    /// `max(limit - current_count, 0)`; never negative.
    pub remaining: u32,
    /// Epoch seconds when the window closes. Equals "now" for a window
    /// with no open counter.
    pub reset_at: u64,
}

/// Read-only snapshot of every window for one composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub windows: Vec<WindowStatus>,
    pub overall_allowed: bool,
}

/// The rate-limiting decision engine.
///
/// Dependencies are injected; there are no process-wide singletons. Clones
/// of the injected handles (store, monitor, scorer) observe the same
/// underlying state.
pub struct RateLimitService<S = NullSink> {
    store: Arc<dyn CounterStore>,
    policies: DynamicConfig<PolicyRegistry>,
    thresholds: ThresholdEngine,
    monitor: Option<Arc<DenialMonitor>>,
    scorer: Option<Arc<dyn BehaviorScorer>>,
    telemetry: S,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl<S> std::fmt::Debug for RateLimitService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimitService<NullSink> {
    /// Create a service over `store` with built-in policies, the system
    /// clock, and no telemetry. Wire collaborators with the `with_*`
    /// builders.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            thresholds: ThresholdEngine::new(store.clone(), clock.clone()),
            store,
            policies: DynamicConfig::new(PolicyRegistry::builtin()),
            monitor: None,
            scorer: None,
            telemetry: NullSink,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl<S> RateLimitService<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Replace the telemetry sink.
    pub fn with_telemetry<T>(self, sink: T) -> RateLimitService<T>
    where
        T: TelemetrySink,
        T::Future: Send + 'static,
    {
        RateLimitService {
            store: self.store,
            policies: self.policies,
            thresholds: self.thresholds,
            monitor: self.monitor,
            scorer: self.scorer,
            telemetry: sink,
            clock: self.clock,
            store_timeout: self.store_timeout,
        }
    }

    /// Replace the policy registry.
    pub fn with_policies(self, registry: PolicyRegistry) -> Self {
        self.policies.set(registry);
        self
    }

    /// Attach a denial monitor that trips an external breaker.
    pub fn with_denial_monitor(mut self, monitor: DenialMonitor) -> Self {
        self.monitor = Some(Arc::new(monitor));
        self
    }

    /// Attach the behavior-scoring capability used by
    /// [`refresh_thresholds`](Self::refresh_thresholds).
    pub fn with_scorer(mut self, scorer: Arc<dyn BehaviorScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Override the clock (deterministic `reset_at` in tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        self.thresholds = ThresholdEngine::new(self.store.clone(), clock.clone());
        self.clock = clock;
        self
    }

    /// Override the per-round-trip store deadline.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Live handle to the policy registry for runtime updates.
    pub fn policies(&self) -> &DynamicConfig<PolicyRegistry> {
        &self.policies
    }

    /// Check and count one request in a single pass.
    ///
    /// Windows are evaluated strictly minute → hour → day and the first
    /// exceeded window short-circuits the result, so identical counter
    /// states always produce the same answer. Each window's store call both
    /// checks and increments atomically; there is no separate "increment"
    /// phase to race against.
    ///
    /// Store failures never surface here: they resolve into a decision per
    /// the limit type's fail mode and are logged and reported to
    /// telemetry. The only error is a misconfigured policy.
    pub async fn check_limit(
        &self,
        identifier: &str,
        limit_type: &LimitType,
        context: &RequestContext,
    ) -> Result<RateLimitResult, ConfigError> {
        let started = Instant::now();
        let limit_key = RateLimitKey::compose(identifier, limit_type, context);
        let policy = self.policies.get().resolve(limit_type).clone();

        let multipliers = match self.bounded(self.thresholds.load(identifier, limit_type)).await {
            Ok(multipliers) => multipliers,
            Err(err) => {
                // Degraded, not dead: base limits still enforce.
                tracing::warn!(
                    identifier = %identifier,
                    limit_type = %limit_type,
                    error = %err,
                    "adaptive config unavailable; using neutral multipliers"
                );
                self.emit(LimiterEvent::StoreUnavailable {
                    limit_type: limit_type.as_str().to_string(),
                    operation: "read_fields",
                    detail: err.to_string(),
                });
                AdaptiveMultipliers::NEUTRAL
            }
        };

        let configs = ThresholdEngine::effective_configs(&policy, &multipliers)?;

        let mut decision = RateLimitResult::Allowed;
        for (window, config) in configs {
            let window_key = limit_key.for_window(window);
            match self
                .bounded(self.store.check_and_incr(&window_key, config.limit, config.window_secs))
                .await
            {
                Ok(sample) if sample.allowed => {}
                Ok(sample) => {
                    decision = RateLimitResult::Denied {
                        retry_after: Duration::from_secs(sample.ttl_secs),
                        violating_window: window,
                    };
                    break;
                }
                Err(err) => {
                    tracing::error!(
                        key = %window_key,
                        error = %err,
                        fail_mode = ?policy.fail_mode(),
                        "counter store unavailable"
                    );
                    self.emit(LimiterEvent::StoreUnavailable {
                        limit_type: limit_type.as_str().to_string(),
                        operation: "check_and_incr",
                        detail: err.to_string(),
                    });
                    match policy.fail_mode() {
                        // Remaining windows may still be servable and deny
                        // legitimately, so keep going.
                        FailMode::Allow => {}
                        FailMode::Deny => {
                            decision = RateLimitResult::Denied {
                                retry_after: STORE_UNAVAILABLE_RETRY,
                                violating_window: window,
                            };
                            break;
                        }
                    }
                }
            }
        }

        let allowed = decision.is_allowed();
        if let Some(monitor) = &self.monitor {
            if let Some(tripped) = monitor.record(limit_type, allowed) {
                self.emit(LimiterEvent::BreakerTripped {
                    breaker: tripped.breaker,
                    denial_ratio: tripped.denial_ratio,
                });
            }
        }
        self.emit(LimiterEvent::Check {
            identifier: identifier.to_string(),
            limit_type: limit_type.as_str().to_string(),
            allowed,
            elapsed: started.elapsed(),
        });

        Ok(decision)
    }

    /// Read current counts for every window without consuming quota.
    ///
    /// This goes through the store's non-mutating read path; polling status
    /// can never cause a later legitimate request to be denied.
    pub async fn get_status(
        &self,
        identifier: &str,
        limit_type: &LimitType,
        context: &RequestContext,
    ) -> Result<StatusReport, AdminError> {
        let limit_key = RateLimitKey::compose(identifier, limit_type, context);
        let policy = self.policies.get().resolve(limit_type).clone();
        let multipliers = self.bounded(self.thresholds.load(identifier, limit_type)).await?;
        let configs = ThresholdEngine::effective_configs(&policy, &multipliers)?;

        let now = self.clock.epoch_secs();
        let mut windows = Vec::with_capacity(configs.len());
        let mut overall_allowed = true;
        for (window, config) in configs {
            let (current_count, ttl_secs) = self
                .bounded(self.store.peek(&limit_key.for_window(window)))
                .await?
                .unwrap_or((0, 0));

            let allowed = current_count < u64::from(config.limit);
            let remaining = u32::try_from(current_count)
                .map(|count| config.limit.saturating_sub(count))
                .unwrap_or(0);
            overall_allowed &= allowed;
            windows.push(WindowStatus {
                window,
                allowed,
                current_count,
                limit: config.limit,
                remaining,
                reset_at: now + ttl_secs,
            });
        }

        Ok(StatusReport { windows, overall_allowed })
    }

    /// Remove every counter under `identifier`, optionally scoped to one
    /// limit type. Returns the number of keys removed so the operation is
    /// verifiable, and reports it for audit.
    ///
    /// Contextual fragments are included in the sweep; adaptive-config
    /// records are not (reset restores quota, it does not forget trust).
    /// Access control is the caller's responsibility.
    pub async fn reset_limits(
        &self,
        identifier: &str,
        limit_type: Option<&LimitType>,
        context: &RequestContext,
    ) -> Result<u64, AdminError> {
        let prefix = match limit_type {
            Some(limit_type) => key::scope_prefix(identifier, limit_type),
            None => key::identifier_prefix(identifier),
        };

        // Pattern deletion legitimately outlives the per-check deadline;
        // it is bounded by the store itself, not by `store_timeout`.
        let removed = self.store.delete_prefixed(&prefix).await?;

        tracing::info!(
            identifier = %identifier,
            prefix = %prefix,
            removed,
            ip = context.ip_address.as_deref().unwrap_or("-"),
            "rate limit counters reset"
        );
        self.emit(LimiterEvent::CountersReset { identifier: identifier.to_string(), removed });

        Ok(removed)
    }

    /// Re-derive and persist adaptive thresholds from a behavior score in
    /// `[0, 1]`.
    pub async fn adjust_thresholds(
        &self,
        identifier: &str,
        limit_type: &LimitType,
        behavior_score: f64,
    ) -> Result<AdaptiveConfig, AdminError> {
        let config = self.thresholds.adjust(identifier, limit_type, behavior_score).await?;
        self.emit(LimiterEvent::ThresholdsAdjusted {
            identifier: identifier.to_string(),
            limit_type: limit_type.as_str().to_string(),
            band: config.band.as_str(),
        });
        Ok(config)
    }

    /// Score the identifier with the injected [`BehaviorScorer`] and apply
    /// the result.
    pub async fn refresh_thresholds(
        &self,
        identifier: &str,
        limit_type: &LimitType,
    ) -> Result<AdaptiveConfig, AdminError> {
        let scorer = self.scorer.as_ref().ok_or(AdminError::ScorerMissing)?;
        let score = scorer.score(identifier, limit_type).await;
        self.adjust_thresholds(identifier, limit_type, score).await
    }

    /// Bound one store round trip; a deadline miss is indistinguishable
    /// from an unreachable store.
    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.store_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    /// Fire-and-forget telemetry; emission never blocks or fails a
    /// decision.
    fn emit(&self, event: LimiterEvent) {
        let sink = self.telemetry.clone();
        tokio::spawn(emit_best_effort(sink, event));
    }
}
