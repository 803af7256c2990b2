//! Composite key derivation for rate-limited entities.
//!
//! Keys deliberately fragment the counter space by contextual dimension:
//! the same identifier seen from two IP addresses gets two independent
//! counters, so one compromised context cannot exhaust another's quota.
//! The trade-off is looser aggregate limiting across contexts.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::policy::Window;

/// Namespace prefix for every counter key.
pub const KEY_PREFIX: &str = "rate_limit";

/// Number of hex characters of the user-agent hash kept in the key.
/// Truncation bounds key length while retaining discriminating power.
const UA_HASH_LEN: usize = 17;

/// Category of operation being limited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimitType {
    Authentication,
    ApiCalls,
    PasswordReset,
    /// Host-defined limit types beyond the built-in set.
    Custom(String),
}

impl LimitType {
    pub fn as_str(&self) -> &str {
        match self {
            LimitType::Authentication => "authentication",
            LimitType::ApiCalls => "api_calls",
            LimitType::PasswordReset => "password_reset",
            LimitType::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request-scoped dimensions, passed explicitly on every call rather than
/// read from ambient state. All fields optional; absent fields are simply
/// omitted from the derived key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub geo_country: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_geo_country(mut self, country: impl Into<String>) -> Self {
        self.geo_country = Some(country.into());
        self
    }
}

/// Composite key for one rate-limited entity. Derived per request; only its
/// string form (suffixed per window) ever reaches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Derive the key for `(identifier, limit_type, context)`. Pure: the
    /// same inputs always produce the same key.
    pub fn compose(identifier: &str, limit_type: &LimitType, context: &RequestContext) -> Self {
        let mut key = format!("{}:{}:{}", KEY_PREFIX, identifier, limit_type.as_str());
        if let Some(ip) = &context.ip_address {
            key.push_str(":ip:");
            key.push_str(ip);
        }
        if let Some(ua) = &context.user_agent {
            key.push_str(":ua:");
            key.push_str(&hash_fragment(ua));
        }
        if let Some(country) = &context.geo_country {
            key.push_str(":geo:");
            key.push_str(country);
        }
        Self(key)
    }

    /// Store key for one counting window.
    pub fn for_window(&self, window: Window) -> String {
        format!("{}:{}", self.0, window.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deletion prefix covering every counter under `identifier`. All window
/// keys end in `:<window>`, so a trailing colon always matches.
pub(crate) fn identifier_prefix(identifier: &str) -> String {
    format!("{}:{}:", KEY_PREFIX, identifier)
}

/// Deletion prefix covering one limit type under `identifier`, including
/// every contextual fragment.
pub(crate) fn scope_prefix(identifier: &str, limit_type: &LimitType) -> String {
    format!("{}:{}:{}:", KEY_PREFIX, identifier, limit_type.as_str())
}

fn hash_fragment(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(UA_HASH_LEN);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
        if hex.len() >= UA_HASH_LEN {
            break;
        }
    }
    hex.truncate(UA_HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_key_has_no_context_segments() {
        let key = RateLimitKey::compose("user-1", &LimitType::ApiCalls, &RequestContext::new());
        assert_eq!(key.as_str(), "rate_limit:user-1:api_calls");
    }

    #[test]
    fn context_segments_appended_in_order() {
        let ctx = RequestContext::new()
            .with_ip("10.0.0.1")
            .with_user_agent("curl/8.0")
            .with_geo_country("DE");
        let key = RateLimitKey::compose("user-1", &LimitType::Authentication, &ctx);
        let s = key.as_str();
        assert!(s.starts_with("rate_limit:user-1:authentication:ip:10.0.0.1:ua:"));
        assert!(s.ends_with(":geo:DE"));
    }

    #[test]
    fn user_agent_hash_is_truncated_and_stable() {
        let ctx = RequestContext::new().with_user_agent("Mozilla/5.0");
        let a = RateLimitKey::compose("u", &LimitType::ApiCalls, &ctx);
        let b = RateLimitKey::compose("u", &LimitType::ApiCalls, &ctx);
        assert_eq!(a, b);

        let ua_part = a.as_str().rsplit(":ua:").next().unwrap();
        assert_eq!(ua_part.len(), UA_HASH_LEN);
        assert!(ua_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_user_agents_fragment_the_key_space() {
        let a = RateLimitKey::compose(
            "u",
            &LimitType::ApiCalls,
            &RequestContext::new().with_user_agent("curl/8.0"),
        );
        let b = RateLimitKey::compose(
            "u",
            &LimitType::ApiCalls,
            &RequestContext::new().with_user_agent("wget/1.21"),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn missing_fields_are_omitted_not_empty() {
        let ctx = RequestContext::new().with_geo_country("US");
        let key = RateLimitKey::compose("u", &LimitType::PasswordReset, &ctx);
        assert_eq!(key.as_str(), "rate_limit:u:password_reset:geo:US");
        assert!(!key.as_str().contains(":ip:"));
        assert!(!key.as_str().contains(":ua:"));
    }

    #[test]
    fn window_suffix_appended_to_composite() {
        let key = RateLimitKey::compose("u", &LimitType::ApiCalls, &RequestContext::new());
        assert_eq!(key.for_window(Window::Minute), "rate_limit:u:api_calls:minute");
        assert_eq!(key.for_window(Window::Day), "rate_limit:u:api_calls:day");
    }

    #[test]
    fn prefixes_cover_window_suffixed_keys() {
        let key = RateLimitKey::compose("u", &LimitType::ApiCalls, &RequestContext::new());
        let window_key = key.for_window(Window::Hour);
        assert!(window_key.starts_with(&identifier_prefix("u")));
        assert!(window_key.starts_with(&scope_prefix("u", &LimitType::ApiCalls)));
        assert!(!window_key.starts_with(&scope_prefix("u", &LimitType::Authentication)));
    }

    #[test]
    fn custom_limit_type_uses_its_name() {
        let custom = LimitType::Custom("exports".into());
        assert_eq!(custom.as_str(), "exports");
        let key = RateLimitKey::compose("u", &custom, &RequestContext::new());
        assert_eq!(key.as_str(), "rate_limit:u:exports");
    }
}
