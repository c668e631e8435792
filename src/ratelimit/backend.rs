//! Counter store trait for abstracting local and networked backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Storage for fixed-window attempt counters.
///
/// A record is created by the first `increment` for a key and lives for the
/// TTL given at that moment. Later increments in the same window never move
/// `expires_at`. Expired records must read as absent.
///
/// Backends report connectivity problems as
/// [`TollgateError::StoreUnavailable`](crate::error::TollgateError::StoreUnavailable).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one to the counter for `key` and return the new count.
    ///
    /// Starts a fresh window of length `ttl` when no live record exists.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Current count for `key`, 0 when absent or expired.
    async fn get(&self, key: &str) -> Result<u64>;

    /// Remove the record for `key`. Clearing an absent key is not an error.
    async fn clear(&self, key: &str) -> Result<()>;

    /// Time until the live record for `key` expires, zero when there is none.
    async fn ttl_remaining(&self, key: &str) -> Result<Duration>;
}
