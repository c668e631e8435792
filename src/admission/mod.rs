//! Request admission across all configured periods.

mod identity;
mod middleware;
mod response;

pub use identity::{IdentityResolver, IdentitySource, RequestContext};
pub use middleware::{
    AdmissionController, Decision, Denial, DenialCause, FailurePolicy, PeriodQuota,
    DEFAULT_UNAVAILABLE_RETRY_AFTER_SECS,
};
pub use response::{
    too_many_attempts_message, HeaderNames, HeaderOverride, RenderedResponse, ResponseRenderer,
    RATE_LIMIT_RESET, RETRY_AFTER,
};
