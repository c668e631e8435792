//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod descriptor;
mod limiter;
mod rules;

pub use backend::CounterStore;
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{CounterRecord, MemoryStore};
pub use descriptor::{CounterKey, DEFAULT_KEY_PREFIX};
pub use limiter::{RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use rules::{default_period_configs, Period, PeriodConfig, TimeUnit, WindowPolicy};

#[cfg(test)]
pub(crate) use limiter::tests::{test_policy, FailingStore, HangingStore};
