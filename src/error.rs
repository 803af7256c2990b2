//! Error types for the rate-limiting core.

use crate::policy::Window;
use std::fmt;
use std::time::Duration;

/// Errors raised by counter-store backends.
///
/// `check_limit` never surfaces these to callers; they are resolved into an
/// allow/deny decision per the limit type's fail mode. Admin operations
/// propagate them explicitly.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// Transport failure or backend rejection.
    #[error("counter store unreachable: {0}")]
    Backend(String),
    /// The store did not answer within the configured deadline.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration errors. These are programming or deployment mistakes and
/// fail fast rather than degrading into a limit of 0 or "unlimited".
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A window limit resolved to zero.
    InvalidLimit {
        /// Window the limit applies to.
        window: Window,
        /// Value provided by caller or computed from multipliers.
        provided: u32,
    },
    /// A window duration resolved to zero seconds.
    InvalidWindowSeconds {
        /// Window the duration applies to.
        window: Window,
        /// Value provided by caller.
        provided: u64,
    },
    /// A behavior score outside `[0.0, 1.0]` (or NaN).
    InvalidScore {
        /// Value provided by caller.
        provided: f64,
    },
    /// A stored adaptive multiplier that is not strictly positive.
    InvalidMultiplier {
        /// Window the multiplier applies to.
        window: Window,
        /// Value read from the store.
        provided: f64,
    },
    /// A denial-monitor trip ratio outside `(0.0, 1.0]`.
    InvalidTripRatio {
        /// Value provided by caller.
        provided: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLimit { window, provided } => {
                write!(f, "{} limit must be >= 1 (got {})", window, provided)
            }
            ConfigError::InvalidWindowSeconds { window, provided } => {
                write!(f, "{} window must be >= 1 second (got {})", window, provided)
            }
            ConfigError::InvalidScore { provided } => {
                write!(f, "behavior score must be within [0.0, 1.0] (got {})", provided)
            }
            ConfigError::InvalidMultiplier { window, provided } => {
                write!(f, "{} multiplier must be > 0 (got {})", window, provided)
            }
            ConfigError::InvalidTripRatio { provided } => {
                write!(f, "trip ratio must be within (0.0, 1.0] (got {})", provided)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors from the status/admin surface (`get_status`, `reset_limits`,
/// `adjust_thresholds`). Unlike `check_limit`, administrative callers get
/// explicit failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AdminError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// `refresh_thresholds` was called without an injected scorer.
    #[error("no behavior scorer configured")]
    ScorerMissing,
}

/// Error type produced by the enforcement middleware.
#[derive(Debug, Clone)]
pub enum LimiterError<E> {
    /// The request was denied by the rate limiter.
    LimitExceeded {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// First window that was exhausted.
        violating_window: Window,
    },
    /// The limiter itself was misconfigured.
    Config(ConfigError),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for LimiterError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded { retry_after, violating_window } => {
                write!(
                    f,
                    "rate limit exceeded for {} window (retry after {:?})",
                    violating_window, retry_after
                )
            }
            Self::Config(e) => write!(f, "{}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimiterError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> LimiterError<E> {
    /// Check if this error is a rate-limit denial.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }

    /// Retry-after hint for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
