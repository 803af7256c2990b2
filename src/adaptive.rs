//! Behavior-score-driven threshold adaptation.
//!
//! A trust score in `[0, 1]` maps to per-window multipliers applied to the
//! base limits. The bands are asymmetric on purpose: trust raises limits
//! more generously over longer windows, while suspicion restricts the
//! short window least aggressively (short-window false positives hit
//! legitimate bursty traffic hardest). Multipliers persist in the store
//! with a 24 h expiry so stale trust decays instead of living forever.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{AdminError, ConfigError, StoreError};
use crate::key::LimitType;
use crate::policy::{LimitPolicy, Window, WindowConfig};
use crate::store::CounterStore;

/// How long a persisted adaptive config lives before the identifier falls
/// back to neutral multipliers and must be re-scored.
pub const ADAPTIVE_CONFIG_TTL_SECS: u64 = 86_400;

/// Namespace for adaptive-config records. Distinct from the counter
/// namespace so `reset_limits` restores quota without forgetting trust.
const ADAPTIVE_KEY_PREFIX: &str = "adaptive_limits";

const SUSPICIOUS_CEILING: f64 = 0.3;
const TRUSTED_FLOOR: f64 = 0.7;

/// Trust band a behavior score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustBand {
    Suspicious,
    Neutral,
    Trusted,
}

impl TrustBand {
    /// Band for a score already validated to lie in `[0, 1]`.
    pub fn for_score(score: f64) -> Self {
        if score < SUSPICIOUS_CEILING {
            TrustBand::Suspicious
        } else if score < TRUSTED_FLOOR {
            TrustBand::Neutral
        } else {
            TrustBand::Trusted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustBand::Suspicious => "suspicious",
            TrustBand::Neutral => "neutral",
            TrustBand::Trusted => "trusted",
        }
    }

    fn multipliers(&self) -> AdaptiveMultipliers {
        match self {
            TrustBand::Suspicious => AdaptiveMultipliers { minute: 0.5, hour: 0.3, day: 0.2 },
            TrustBand::Neutral => AdaptiveMultipliers::NEUTRAL,
            TrustBand::Trusted => AdaptiveMultipliers { minute: 1.5, hour: 1.8, day: 2.0 },
        }
    }
}

/// Per-window multipliers applied to base limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveMultipliers {
    pub minute: f64,
    pub hour: f64,
    pub day: f64,
}

impl AdaptiveMultipliers {
    /// No adjustment; the value an identifier gets with no stored record.
    pub const NEUTRAL: Self = Self { minute: 1.0, hour: 1.0, day: 1.0 };

    pub fn for_window(&self, window: Window) -> f64 {
        match window {
            Window::Minute => self.minute,
            Window::Hour => self.hour,
            Window::Day => self.day,
        }
    }
}

/// Persisted adaptive override for one `(identifier, limit_type)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub band: TrustBand,
    pub multipliers: AdaptiveMultipliers,
    /// Epoch seconds of the last adjustment.
    pub updated_at: u64,
}

/// Injected capability producing a behavior score in `[0, 1]`. The core
/// depends only on this interface, never on a specific scoring model.
#[async_trait]
pub trait BehaviorScorer: Send + Sync {
    async fn score(&self, identifier: &str, limit_type: &LimitType) -> f64;
}

/// Store-backed engine resolving effective per-window limits.
#[derive(Clone)]
pub struct ThresholdEngine {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ThresholdEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdEngine")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ThresholdEngine {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn record_key(identifier: &str, limit_type: &LimitType) -> String {
        format!("{}:{}:{}", ADAPTIVE_KEY_PREFIX, identifier, limit_type.as_str())
    }

    /// Map a fresh behavior score to multipliers and persist them with the
    /// decay TTL. Scores outside `[0, 1]` (or NaN) fail fast.
    pub async fn adjust(
        &self,
        identifier: &str,
        limit_type: &LimitType,
        score: f64,
    ) -> Result<AdaptiveConfig, AdminError> {
        validate_score(score)?;
        let band = TrustBand::for_score(score);
        let multipliers = band.multipliers();
        let updated_at = self.clock.epoch_secs();

        let fields = vec![
            ("minute".to_string(), multipliers.minute.to_string()),
            ("hour".to_string(), multipliers.hour.to_string()),
            ("day".to_string(), multipliers.day.to_string()),
            ("updated_at".to_string(), updated_at.to_string()),
        ];
        self.store
            .write_fields(
                &Self::record_key(identifier, limit_type),
                &fields,
                ADAPTIVE_CONFIG_TTL_SECS,
            )
            .await?;

        tracing::debug!(
            identifier = %identifier,
            limit_type = %limit_type,
            band = band.as_str(),
            score,
            "adaptive thresholds adjusted"
        );

        Ok(AdaptiveConfig { band, multipliers, updated_at })
    }

    /// Load the stored multipliers for an identifier. Absent or expired
    /// records resolve to neutral; a record that fails to parse resolves to
    /// neutral with a warning rather than wedging the limiter.
    pub async fn load(
        &self,
        identifier: &str,
        limit_type: &LimitType,
    ) -> Result<AdaptiveMultipliers, StoreError> {
        let key = Self::record_key(identifier, limit_type);
        let fields = self.store.read_fields(&key).await?;
        if fields.is_empty() {
            return Ok(AdaptiveMultipliers::NEUTRAL);
        }

        match parse_multipliers(&fields) {
            Some(multipliers) => Ok(multipliers),
            None => {
                tracing::warn!(key = %key, "unparseable adaptive config; using neutral multipliers");
                Ok(AdaptiveMultipliers::NEUTRAL)
            }
        }
    }

    /// Effective window configs: `round(base × multiplier)`, floored at 1
    /// so rounding can never compute an identifier into a permanent block.
    pub fn effective_configs(
        policy: &LimitPolicy,
        multipliers: &AdaptiveMultipliers,
    ) -> Result<[(Window, WindowConfig); 3], ConfigError> {
        let mut configs = [(Window::Minute, WindowConfig { limit: 1, window_secs: 1 }); 3];
        for (slot, window) in configs.iter_mut().zip(Window::EVALUATION_ORDER) {
            let multiplier = multipliers.for_window(window);
            if multiplier.is_nan() || multiplier <= 0.0 {
                return Err(ConfigError::InvalidMultiplier { window, provided: multiplier });
            }
            let effective =
                ((f64::from(policy.base_limit(window)) * multiplier).round() as u32).max(1);
            *slot = (window, WindowConfig::new(window, effective, window.seconds())?);
        }
        Ok(configs)
    }
}

pub(crate) fn validate_score(score: f64) -> Result<(), ConfigError> {
    if score.is_nan() || !(0.0..=1.0).contains(&score) {
        return Err(ConfigError::InvalidScore { provided: score });
    }
    Ok(())
}

fn parse_multipliers(fields: &HashMap<String, String>) -> Option<AdaptiveMultipliers> {
    let read = |name: &str| -> Option<f64> {
        let value: f64 = fields.get(name)?.parse().ok()?;
        (value > 0.0 && value.is_finite()).then_some(value)
    };
    Some(AdaptiveMultipliers { minute: read("minute")?, hour: read("hour")?, day: read("day")? })
}
