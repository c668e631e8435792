//! Multi-period admission decisions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TollgateError};
use crate::ratelimit::{CounterStore, Period, RateLimiter};

/// Default `Retry-After` hint when the store is unavailable and the request
/// is failed closed.
pub const DEFAULT_UNAVAILABLE_RETRY_AFTER_SECS: u64 = 1;

/// What to do with a request when the counter store cannot be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Deny the request so an outage cannot be used to bypass quotas
    #[default]
    Closed,
    /// Let the request through without quota metadata
    Open,
}

/// Quota state of one period after an allowed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodQuota {
    /// Period name
    pub period: String,
    /// Configured maximum for the period
    pub limit: u64,
    /// Attempts left in the current window
    pub remaining: u64,
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCause {
    /// The period's quota is used up
    LimitExceeded,
    /// The store failed and the failure policy is closed
    StoreUnavailable,
}

/// Details of a denied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    /// The first period found over its limit, or the period being evaluated
    /// when the store failed
    pub period: String,
    /// Seconds until the client may retry
    pub retry_after_seconds: u64,
    /// Unix timestamp at which the period's window resets
    pub reset_at: i64,
    /// Why the request was denied
    pub cause: DenialCause,
}

/// Outcome of admitting one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// The request may proceed. Quotas follow policy order and are empty
    /// when the store was unavailable under a fail-open policy.
    Allowed { quotas: Vec<PeriodQuota> },
    /// The request must be rejected.
    Denied(Denial),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Quota for a period of an allowed request.
    pub fn quota(&self, period: &str) -> Option<&PeriodQuota> {
        match self {
            Decision::Allowed { quotas } => quotas.iter().find(|q| q.period == period),
            Decision::Denied(_) => None,
        }
    }

    /// Denial details of a rejected request.
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied(denial) => Some(denial),
        }
    }
}

/// A store failure together with the period being evaluated when it happened.
struct Failure {
    period: String,
    error: TollgateError,
}

/// Admits or rejects requests against every period of a limiter's policy.
///
/// Each request runs two phases. All periods are checked first, in policy
/// order, and the first one over its limit rejects the request. Only when
/// every period passes is each period hit once. A rejected request therefore
/// consumes no quota in any period.
pub struct AdmissionController<S: CounterStore> {
    /// The per-period engine
    limiter: RateLimiter<S>,
    /// Behavior on store failure
    failure_policy: FailurePolicy,
    /// Retry hint for fail-closed denials
    unavailable_retry_after: u64,
}

impl<S: CounterStore> AdmissionController<S> {
    /// Create a fail-closed controller over a limiter.
    pub fn new(limiter: RateLimiter<S>) -> Self {
        Self {
            limiter,
            failure_policy: FailurePolicy::default(),
            unavailable_retry_after: DEFAULT_UNAVAILABLE_RETRY_AFTER_SECS,
        }
    }

    /// Set the store failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the `Retry-After` hint used when failing closed.
    pub fn with_unavailable_retry_after(mut self, seconds: u64) -> Self {
        self.unavailable_retry_after = seconds;
        self
    }

    /// The underlying limiter.
    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Decide on a request, surfacing store failures as errors.
    pub async fn check(&self, identity: &str) -> Result<Decision> {
        self.evaluate(identity).await.map_err(|failure| failure.error)
    }

    /// Decide on a request, resolving store failures with the failure policy.
    #[instrument(skip(self), fields(policy = ?self.failure_policy))]
    pub async fn admit(&self, identity: &str) -> Decision {
        match self.evaluate(identity).await {
            Ok(decision) => decision,
            Err(Failure { period, error }) => {
                warn!(
                    identity,
                    period = %period,
                    error = %error,
                    "Counter store failed during admission"
                );
                match self.failure_policy {
                    FailurePolicy::Open => Decision::Allowed { quotas: Vec::new() },
                    FailurePolicy::Closed => Decision::Denied(Denial {
                        period,
                        retry_after_seconds: self.unavailable_retry_after,
                        reset_at: self.reset_timestamp(self.unavailable_retry_after),
                        cause: DenialCause::StoreUnavailable,
                    }),
                }
            }
        }
    }

    /// Clear every period's counter for an identity.
    pub async fn reset(&self, identity: &str) -> Result<()> {
        for period in self.limiter.policy().periods() {
            self.limiter.clear(period, identity).await?;
        }
        info!(identity, "Reset all rate limit counters");
        Ok(())
    }

    async fn evaluate(&self, identity: &str) -> std::result::Result<Decision, Failure> {
        let periods = self.limiter.policy().periods();

        for period in periods {
            if guard(period, self.limiter.too_many_attempts(period, identity).await)? {
                let retry_after_seconds =
                    guard(period, self.limiter.available_in(period, identity).await)?;

                info!(
                    identity,
                    period = period.name(),
                    limit = period.max_attempts(),
                    retry_after_seconds,
                    "Rate limit exceeded"
                );

                return Ok(Decision::Denied(Denial {
                    period: period.name().to_string(),
                    retry_after_seconds,
                    reset_at: self.reset_timestamp(retry_after_seconds),
                    cause: DenialCause::LimitExceeded,
                }));
            }
        }

        for period in periods {
            guard(period, self.limiter.hit(period, identity).await)?;
        }

        let mut quotas = Vec::with_capacity(periods.len());
        for period in periods {
            let remaining = guard(period, self.limiter.remaining(period, identity).await)?;
            quotas.push(PeriodQuota {
                period: period.name().to_string(),
                limit: period.max_attempts(),
                remaining,
            });
        }

        debug!(identity, quotas = ?quotas, "Request admitted");
        Ok(Decision::Allowed { quotas })
    }

    fn reset_timestamp(&self, retry_after_seconds: u64) -> i64 {
        let delta = i64::try_from(retry_after_seconds).unwrap_or(i64::MAX);
        self.limiter.clock().now().timestamp().saturating_add(delta)
    }
}

fn guard<T>(period: &Period, result: Result<T>) -> std::result::Result<T, Failure> {
    result.map_err(|error| Failure {
        period: period.name().to_string(),
        error,
    })
}
