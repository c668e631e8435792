//! Counter key generation.

use std::fmt;

use super::rules::Period;
use crate::error::{Result, TollgateError};

const SEPARATOR: char = ':';

/// Default namespace prepended to every counter key.
pub const DEFAULT_KEY_PREFIX: &str = "throttle";

/// A key that uniquely identifies the counter for one (period, identity) pair.
///
/// Rendered as `"<prefix>:<period>:<identity>"`. Neither prefixes nor period
/// names may contain `:`, so the first two `:` always end the prefix and
/// period segments and two different keys never render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Namespace shared by all keys of one limiter
    pub prefix: String,
    /// The period name
    pub period: String,
    /// The caller identity
    pub identity: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(prefix: &str, period: &Period, identity: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            period: period.name().to_string(),
            identity: identity.to_string(),
        }
    }

    /// Convert the counter key to the string handed to the store.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}:{}", self.prefix, self.period, self.identity)
    }
}

/// Check that a key prefix is non-empty and cannot be confused with the
/// period segment.
pub(crate) fn validate_key_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(TollgateError::Config("key prefix must not be empty".to_string()));
    }
    if prefix.contains(SEPARATOR) {
        return Err(TollgateError::Config(format!(
            "key prefix '{}' must not contain '{}'",
            prefix, SEPARATOR
        )));
    }
    Ok(())
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn period(name: &str) -> Period {
        Period::new(name, Duration::from_secs(60), 10).unwrap()
    }

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new(DEFAULT_KEY_PREFIX, &period("minute"), "127.0.0.1");
        assert_eq!(key.to_store_key(), "throttle:minute:127.0.0.1");
        assert_eq!(key.to_string(), key.to_store_key());
    }

    #[test]
    fn test_counter_key_stable() {
        let key1 = CounterKey::new(DEFAULT_KEY_PREFIX, &period("hour"), "user-1");
        let key2 = CounterKey::new(DEFAULT_KEY_PREFIX, &period("hour"), "user-1");
        assert_eq!(key1, key2);
        assert_eq!(key1.to_store_key(), key2.to_store_key());
    }

    #[test]
    fn test_counter_key_distinct_per_period_and_identity() {
        let minute = period("minute");
        let hour = period("hour");

        let a = CounterKey::new(DEFAULT_KEY_PREFIX, &minute, "10.0.0.1").to_store_key();
        let b = CounterKey::new(DEFAULT_KEY_PREFIX, &hour, "10.0.0.1").to_store_key();
        let c = CounterKey::new(DEFAULT_KEY_PREFIX, &minute, "10.0.0.2").to_store_key();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_identity_with_separator_cannot_collide() {
        // "a" + "b:c" must not look like period "a:b" + identity "c".
        let key = CounterKey::new(DEFAULT_KEY_PREFIX, &period("a"), "b:c").to_store_key();
        assert_eq!(key, "throttle:a:b:c");
        assert!(Period::new("a:b", Duration::from_secs(1), 1).is_err());
    }

    #[test]
    fn test_prefix_and_period_cannot_collide() {
        // Prefix "a" + period "b-c" against prefix "a-b" + period "c".
        let first = CounterKey::new("a", &period("b-c"), "client").to_store_key();
        let second = CounterKey::new("a-b", &period("c"), "client").to_store_key();
        assert_eq!(first, "a:b-c:client");
        assert_eq!(second, "a-b:c:client");
        assert_ne!(first, second);
    }

    #[test]
    fn test_key_prefix_validation() {
        assert!(validate_key_prefix(DEFAULT_KEY_PREFIX).is_ok());
        assert!(validate_key_prefix("api-v2").is_ok());
        assert!(matches!(validate_key_prefix(""), Err(TollgateError::Config(_))));
        assert!(matches!(validate_key_prefix("a:b"), Err(TollgateError::Config(_))));
    }
}
