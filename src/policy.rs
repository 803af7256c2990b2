//! Per-limit-type rate policies: window definitions, base limits, and the
//! fail mode applied when the counter store is unreachable.

use crate::error::ConfigError;
use crate::key::LimitType;
use std::collections::HashMap;
use std::fmt;

/// A fixed counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// Windows in the order `check_limit` evaluates them. The first denied
    /// window in this order is the one reported, so results are
    /// reproducible for identical counter states.
    pub const EVALUATION_ORDER: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    pub fn seconds(&self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Effective policy for one window, computed fresh per check from the base
/// limit and the identifier's adaptive multiplier. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub limit: u32,
    pub window_secs: u64,
}

impl WindowConfig {
    pub fn new(window: Window, limit: u32, window_secs: u64) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidLimit { window, provided: limit });
        }
        if window_secs == 0 {
            return Err(ConfigError::InvalidWindowSeconds { window, provided: window_secs });
        }
        Ok(Self { limit, window_secs })
    }
}

/// What to do when the counter store cannot answer within the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Let traffic through; rate limiting is protective, not
    /// correctness-critical, for most paths.
    Allow,
    /// Deny; the safe default for credential-guessing surfaces.
    Deny,
}

/// Base limits for one limit type across all three windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    minute_limit: u32,
    hour_limit: u32,
    day_limit: u32,
    fail_mode: FailMode,
}

impl LimitPolicy {
    /// Create a policy with validation. Limits must be >= 1.
    pub fn new(
        minute_limit: u32,
        hour_limit: u32,
        day_limit: u32,
        fail_mode: FailMode,
    ) -> Result<Self, ConfigError> {
        for (window, limit) in [
            (Window::Minute, minute_limit),
            (Window::Hour, hour_limit),
            (Window::Day, day_limit),
        ] {
            if limit == 0 {
                return Err(ConfigError::InvalidLimit { window, provided: limit });
            }
        }
        Ok(Self { minute_limit, hour_limit, day_limit, fail_mode })
    }

    pub fn base_limit(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.minute_limit,
            Window::Hour => self.hour_limit,
            Window::Day => self.day_limit,
        }
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }
}

/// Registry mapping limit types to their policies.
///
/// Held behind a [`crate::DynamicConfig`] in the service so policies can be
/// replaced at runtime without restarting callers.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, LimitPolicy>,
    fallback: LimitPolicy,
}

impl PolicyRegistry {
    /// Built-in defaults: security-critical types fail closed, everything
    /// else fails open.
    pub fn builtin() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            LimitType::Authentication.as_str().to_string(),
            LimitPolicy { minute_limit: 5, hour_limit: 20, day_limit: 100, fail_mode: FailMode::Deny },
        );
        policies.insert(
            LimitType::ApiCalls.as_str().to_string(),
            LimitPolicy {
                minute_limit: 60,
                hour_limit: 1_000,
                day_limit: 10_000,
                fail_mode: FailMode::Allow,
            },
        );
        policies.insert(
            LimitType::PasswordReset.as_str().to_string(),
            LimitPolicy { minute_limit: 3, hour_limit: 10, day_limit: 20, fail_mode: FailMode::Deny },
        );
        Self {
            policies,
            // Unregistered custom types inherit API-call-shaped limits.
            fallback: LimitPolicy {
                minute_limit: 60,
                hour_limit: 1_000,
                day_limit: 10_000,
                fail_mode: FailMode::Allow,
            },
        }
    }

    /// Register or replace the policy for a limit type.
    pub fn set(&mut self, limit_type: &LimitType, policy: LimitPolicy) {
        self.policies.insert(limit_type.as_str().to_string(), policy);
    }

    /// Resolve the policy for a limit type, falling back to the default for
    /// unregistered custom types.
    pub fn resolve(&self, limit_type: &LimitType) -> &LimitPolicy {
        self.policies.get(limit_type.as_str()).unwrap_or(&self.fallback)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
