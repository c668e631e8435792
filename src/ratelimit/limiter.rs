//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::backend::CounterStore;
use super::clock::{Clock, SystemClock};
use super::descriptor::{validate_key_prefix, CounterKey, DEFAULT_KEY_PREFIX};
use super::rules::{Period, WindowPolicy};
use crate::error::{Result, TollgateError};

/// Default upper bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Per-period counting engine over a [`CounterStore`].
///
/// The engine answers questions about one (period, identity) pair at a time.
/// It never checks a limit on its own when hitting; callers that want
/// rejected requests to stay free must check every period first.
pub struct RateLimiter<S: CounterStore> {
    /// Backend holding the counters
    store: Arc<S>,
    /// Periods and their limits
    policy: WindowPolicy,
    /// Time source for reset timestamps
    clock: Arc<dyn Clock>,
    /// Namespace for counter keys
    key_prefix: String,
    /// Upper bound for each store call
    store_timeout: Duration,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter with default settings.
    pub fn new(store: Arc<S>, policy: WindowPolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock::new()),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Use a different clock for reset timestamps.
    ///
    /// Should be the same clock the store expires records with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different counter key namespace.
    ///
    /// The prefix must be non-empty and free of `:`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_key_prefix(&prefix)?;
        self.key_prefix = prefix;
        Ok(self)
    }

    /// Bound every store call by `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The window policy.
    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Look up a period of this limiter's policy by name.
    pub fn period(&self, name: &str) -> Result<&Period> {
        self.policy.period(name)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The clock used for reset timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Build the counter key for a period and identity.
    pub fn counter_key(&self, period: &Period, identity: &str) -> CounterKey {
        CounterKey::new(&self.key_prefix, period, identity)
    }

    /// Whether the identity has used up the period's quota.
    pub async fn too_many_attempts(&self, period: &Period, identity: &str) -> Result<bool> {
        self.too_many_attempts_with(period, identity, period.max_attempts())
            .await
    }

    /// Like [`too_many_attempts`](Self::too_many_attempts), but against an
    /// explicit `max` instead of the period's configured limit.
    pub async fn too_many_attempts_with(
        &self,
        period: &Period,
        identity: &str,
        max: u64,
    ) -> Result<bool> {
        let attempts = self.attempts(period, identity).await?;
        let exceeded = attempts >= max;

        trace!(
            period = period.name(),
            identity,
            attempts,
            limit = max,
            exceeded,
            "Checked rate limit"
        );

        Ok(exceeded)
    }

    /// Raw attempt count in the current window.
    pub async fn attempts(&self, period: &Period, identity: &str) -> Result<u64> {
        let key = self.counter_key(period, identity).to_store_key();
        self.bounded("get", &key, self.store.get(&key)).await
    }

    /// Attempts left in the current window, never below zero.
    pub async fn remaining(&self, period: &Period, identity: &str) -> Result<u64> {
        let attempts = self.attempts(period, identity).await?;
        Ok(period.max_attempts().saturating_sub(attempts))
    }

    /// Record one attempt and return the new count.
    ///
    /// The counter lives for the period's own duration.
    pub async fn hit(&self, period: &Period, identity: &str) -> Result<u64> {
        let key = self.counter_key(period, identity).to_store_key();
        let count = self
            .bounded("increment", &key, self.store.increment(&key, period.duration()))
            .await?;

        debug!(
            key = %key,
            count,
            limit = period.max_attempts(),
            "Recorded attempt"
        );

        Ok(count)
    }

    /// Reset the period's counter for the identity.
    pub async fn clear(&self, period: &Period, identity: &str) -> Result<()> {
        let key = self.counter_key(period, identity).to_store_key();
        self.bounded("clear", &key, self.store.clear(&key)).await?;
        debug!(key = %key, "Cleared counter");
        Ok(())
    }

    /// Whole seconds until the period's window resets, rounded up.
    ///
    /// Zero when no window is open.
    pub async fn available_in(&self, period: &Period, identity: &str) -> Result<u64> {
        let key = self.counter_key(period, identity).to_store_key();
        let ttl = self
            .bounded("ttl_remaining", &key, self.store.ttl_remaining(&key))
            .await?;
        Ok(ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0))
    }

    async fn bounded<T, F>(&self, op: &'static str, key: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    op,
                    key,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Counter store call timed out"
                );
                Err(TollgateError::StoreUnavailable(format!(
                    "{} on '{}' timed out after {:?}",
                    op, key, self.store_timeout
                )))
            }
        }
    }
}
