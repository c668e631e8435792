//! In-memory counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::clock::{deadline, time_until, Clock, SystemClock};
use crate::error::Result;

/// A fixed-window attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Attempts recorded in this window
    pub count: u64,
    /// When the window closes
    pub expires_at: DateTime<Utc>,
}

impl CounterRecord {
    /// Open a new window at `now` holding its first attempt.
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            count: 1,
            expires_at: deadline(now, ttl),
        }
    }

    /// Whether the window has closed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-local [`CounterStore`] backed by a sharded concurrent map.
///
/// Each increment runs under the shard lock for its key, so concurrent
/// callers hitting the same key never lose an update. Expired records are
/// dropped lazily on access, by [`MemoryStore::purge_expired`], or by the
/// optional background sweeper.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<String, CounterRecord>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Snapshot of the record for `key`, including expired ones not yet dropped.
    pub fn record(&self, key: &str) -> Option<CounterRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Number of records held, live or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every expired record and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
        removed
    }

    /// Spawn a task that purges expired records every `interval`.
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.purge_expired();
            }
        })
    }

    fn live_record(&self, key: &str, now: DateTime<Utc>) -> Option<CounterRecord> {
        let found = self.records.get(key).map(|r| *r)?;
        if found.is_expired(now) {
            self.records.remove_if(key, |_, r| r.is_expired(now));
            return None;
        }
        Some(found)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = self.clock.now();
        let count = match self.records.entry(key.to_owned()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let record = entry.get_mut();
                record.count += 1;
                record.count
            }
            Entry::Occupied(mut entry) => {
                trace!(key, "Counter window elapsed, starting a new one");
                entry.insert(CounterRecord::new(now, ttl));
                1
            }
            Entry::Vacant(entry) => {
                debug!(key, ttl_secs = ttl.as_secs(), "Creating new counter");
                entry.insert(CounterRecord::new(now, ttl));
                1
            }
        };
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let now = self.clock.now();
        Ok(self.live_record(key, now).map_or(0, |r| r.count))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Duration> {
        let now = self.clock.now();
        Ok(self
            .live_record(key, now)
            .map_or(Duration::ZERO, |r| time_until(now, r.expires_at)))
    }
}
