//! Rendering decisions into HTTP status, headers and body.
//!
//! Framework adapters copy the rendered pieces onto their own response type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::middleware::{Decision, DenialCause};
use crate::error::{Result, TollgateError};
use crate::ratelimit::WindowPolicy;

pub const RETRY_AFTER: &str = "Retry-After";
pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

const LIMIT_HEADER_BASE: &str = "X-RateLimit-Limit";
const REMAINING_HEADER_BASE: &str = "X-RateLimit-Remaining";
const PRIMARY_PERIOD: &str = "minute";

/// Per-period header name overrides, as found in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOverride {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub remaining: Option<String>,
}

/// Header names used to report one period's quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    pub limit: String,
    pub remaining: String,
}

impl HeaderNames {
    /// Default names for a period.
    ///
    /// The primary period uses the bare `X-RateLimit-Limit` and
    /// `X-RateLimit-Remaining`; other periods append `-<Name>`.
    fn derive(period: &str, primary: bool) -> Self {
        if primary {
            return Self {
                limit: LIMIT_HEADER_BASE.to_string(),
                remaining: REMAINING_HEADER_BASE.to_string(),
            };
        }
        let suffix = capitalize(period);
        Self {
            limit: format!("{}-{}", LIMIT_HEADER_BASE, suffix),
            remaining: format!("{}-{}", REMAINING_HEADER_BASE, suffix),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A decision rendered for an HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedResponse {
    /// 200 for allowed requests, 429 or 503 for denied ones
    pub status: u16,
    /// Headers in emission order
    pub headers: Vec<(String, String)>,
    /// JSON body for denied requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl RenderedResponse {
    /// Value of the first header with the given name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Turns [`Decision`]s into status codes, headers and JSON bodies.
#[derive(Debug, Clone)]
pub struct ResponseRenderer {
    headers: HashMap<String, HeaderNames>,
}

impl ResponseRenderer {
    /// Renderer using the default header names for every period.
    ///
    /// The bare headers belong to `minute` when the policy has it, otherwise
    /// to the first period.
    pub fn new(policy: &WindowPolicy) -> Self {
        let primary = policy
            .periods()
            .iter()
            .find(|p| p.name() == PRIMARY_PERIOD)
            .or_else(|| policy.periods().first())
            .map(|p| p.name());
        let headers = policy
            .periods()
            .iter()
            .map(|p| {
                let names = HeaderNames::derive(p.name(), primary == Some(p.name()));
                (p.name().to_string(), names)
            })
            .collect();
        Self { headers }
    }

    /// Renderer with configured header names.
    ///
    /// Override keys match period names ignoring case. Overrides for periods
    /// missing from the policy are rejected.
    pub fn with_overrides(
        policy: &WindowPolicy,
        overrides: &HashMap<String, HeaderOverride>,
    ) -> Result<Self> {
        let mut renderer = Self::new(policy);
        for (period, names) in overrides {
            let key = period.to_ascii_lowercase();
            let entry = renderer.headers.get_mut(&key).ok_or_else(|| {
                TollgateError::InvalidPeriod(format!(
                    "header override for unknown period '{}'",
                    period
                ))
            })?;
            if let Some(limit) = &names.limit {
                entry.limit = limit.clone();
            }
            if let Some(remaining) = &names.remaining {
                entry.remaining = remaining.clone();
            }
        }
        Ok(renderer)
    }

    /// Header names for a period, ignoring case.
    pub fn header_names(&self, period: &str) -> Option<&HeaderNames> {
        self.headers.get(&period.to_ascii_lowercase())
    }

    /// Render a decision.
    pub fn render(&self, decision: &Decision) -> RenderedResponse {
        match decision {
            Decision::Allowed { quotas } => {
                let mut headers = Vec::with_capacity(quotas.len() * 2);
                for quota in quotas {
                    let names = self
                        .headers
                        .get(&quota.period)
                        .cloned()
                        .unwrap_or_else(|| HeaderNames::derive(&quota.period, false));
                    headers.push((names.limit, quota.limit.to_string()));
                    headers.push((names.remaining, quota.remaining.to_string()));
                }
                RenderedResponse {
                    status: 200,
                    headers,
                    body: None,
                }
            }
            Decision::Denied(denial) => {
                let (status, message) = match denial.cause {
                    DenialCause::LimitExceeded => {
                        (429, too_many_attempts_message(denial.retry_after_seconds))
                    }
                    DenialCause::StoreUnavailable => {
                        (503, unavailable_message(denial.retry_after_seconds))
                    }
                };
                RenderedResponse {
                    status,
                    headers: vec![
                        (RETRY_AFTER.to_string(), denial.retry_after_seconds.to_string()),
                        (RATE_LIMIT_RESET.to_string(), denial.reset_at.to_string()),
                    ],
                    body: Some(json!({ "message": message })),
                }
            }
        }
    }
}

/// `"Too many attempts. Please try again in {N} {unit}."`
pub fn too_many_attempts_message(retry_after_seconds: u64) -> String {
    format!(
        "Too many attempts. Please try again in {}.",
        wait_phrase(retry_after_seconds)
    )
}

fn unavailable_message(retry_after_seconds: u64) -> String {
    format!(
        "Rate limit service unavailable. Please try again in {}.",
        wait_phrase(retry_after_seconds)
    )
}

/// Seconds up to a minute, whole minutes rounded up beyond that.
fn wait_phrase(seconds: u64) -> String {
    if seconds > 60 {
        format!("{} minutes", seconds.div_ceil(60))
    } else {
        format!("{} seconds", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::middleware::{Denial, PeriodQuota};
    use crate::ratelimit::{default_period_configs, Period, WindowPolicy};
    use std::time::Duration;

    fn allowed() -> Decision {
        Decision::Allowed {
            quotas: vec![
                PeriodQuota {
                    period: "minute".into(),
                    limit: 10,
                    remaining: 9,
                },
                PeriodQuota {
                    period: "hour".into(),
                    limit: 100,
                    remaining: 99,
                },
                PeriodQuota {
                    period: "day".into(),
                    limit: 1000,
                    remaining: 999,
                },
            ],
        }
    }

    fn denied(retry_after_seconds: u64, cause: DenialCause) -> Decision {
        Decision::Denied(Denial {
            period: "minute".into(),
            retry_after_seconds,
            reset_at: 1_700_000_000,
            cause,
        })
    }

    #[test]
    fn test_default_header_names() {
        let renderer = ResponseRenderer::new(&WindowPolicy::default());
        let response = renderer.render(&allowed());

        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers,
            vec![
                ("X-RateLimit-Limit".to_string(), "10".to_string()),
                ("X-RateLimit-Remaining".to_string(), "9".to_string()),
                ("X-RateLimit-Limit-Hour".to_string(), "100".to_string()),
                ("X-RateLimit-Remaining-Hour".to_string(), "99".to_string()),
                ("X-RateLimit-Limit-Day".to_string(), "1000".to_string()),
                ("X-RateLimit-Remaining-Day".to_string(), "999".to_string()),
            ]
        );
        assert!(response.body.is_none());
    }

    #[test]
    fn test_header_overrides() {
        let policy = WindowPolicy::default();
        let mut overrides = HashMap::new();
        overrides.insert(
            "hour".to_string(),
            HeaderOverride {
                limit: Some("X-Hourly-Limit".to_string()),
                remaining: None,
            },
        );

        let renderer = ResponseRenderer::with_overrides(&policy, &overrides).unwrap();
        let response = renderer.render(&allowed());

        assert_eq!(response.header("x-hourly-limit"), Some("100"));
        assert_eq!(response.header("X-RateLimit-Remaining-Hour"), Some("99"));
    }

    #[test]
    fn test_bare_headers_follow_minute() {
        let policy = WindowPolicy::new(vec![
            Period::new("second", Duration::from_secs(1), 5).unwrap(),
            Period::new("minute", Duration::from_secs(60), 10).unwrap(),
        ])
        .unwrap();
        let renderer = ResponseRenderer::new(&policy);
        let decision = Decision::Allowed {
            quotas: vec![
                PeriodQuota {
                    period: "second".into(),
                    limit: 5,
                    remaining: 4,
                },
                PeriodQuota {
                    period: "minute".into(),
                    limit: 10,
                    remaining: 9,
                },
            ],
        };

        let response = renderer.render(&decision);

        assert_eq!(response.header("X-RateLimit-Limit"), Some("10"));
        assert_eq!(response.header("X-RateLimit-Remaining"), Some("9"));
        assert_eq!(response.header("X-RateLimit-Limit-Second"), Some("5"));
        assert_eq!(response.header("X-RateLimit-Remaining-Second"), Some("4"));
    }

    #[test]
    fn test_bare_headers_fall_back_to_first_period() {
        let policy = WindowPolicy::new(vec![
            Period::new("burst", Duration::from_secs(5), 3).unwrap(),
            Period::new("hour", Duration::from_secs(3600), 100).unwrap(),
        ])
        .unwrap();
        let renderer = ResponseRenderer::new(&policy);

        assert_eq!(renderer.header_names("burst").unwrap().limit, "X-RateLimit-Limit");
        assert_eq!(renderer.header_names("hour").unwrap().limit, "X-RateLimit-Limit-Hour");
    }

    #[test]
    fn test_override_keys_ignore_case() {
        let burst = Period::new("Burst", Duration::from_secs(5), 3).unwrap();
        let policy = WindowPolicy::new(vec![burst]).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert(
            "BURST".to_string(),
            HeaderOverride {
                limit: Some("X-Burst-Limit".to_string()),
                remaining: None,
            },
        );

        let renderer = ResponseRenderer::with_overrides(&policy, &overrides).unwrap();

        assert_eq!(renderer.header_names("burst").unwrap().limit, "X-Burst-Limit");
        assert_eq!(renderer.header_names("Burst").unwrap().limit, "X-Burst-Limit");
    }

    #[test]
    fn test_override_for_unknown_period_rejected() {
        let policy = WindowPolicy::from_configs(&default_period_configs()).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("week".to_string(), HeaderOverride::default());

        let err = ResponseRenderer::with_overrides(&policy, &overrides).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPeriod(_)));
    }

    #[test]
    fn test_denied_response() {
        let renderer = ResponseRenderer::new(&WindowPolicy::default());
        let response = renderer.render(&denied(42, DenialCause::LimitExceeded));

        assert_eq!(response.status, 429);
        assert_eq!(response.header(RETRY_AFTER), Some("42"));
        assert_eq!(response.header(RATE_LIMIT_RESET), Some("1700000000"));
        assert_eq!(
            response.body.unwrap()["message"],
            "Too many attempts. Please try again in 42 seconds."
        );
    }

    #[test]
    fn test_store_unavailable_response() {
        let renderer = ResponseRenderer::new(&WindowPolicy::default());
        let response = renderer.render(&denied(1, DenialCause::StoreUnavailable));

        assert_eq!(response.status, 503);
        assert_eq!(response.header(RETRY_AFTER), Some("1"));
    }

    #[test]
    fn test_message_units() {
        assert_eq!(
            too_many_attempts_message(60),
            "Too many attempts. Please try again in 60 seconds."
        );
        assert_eq!(
            too_many_attempts_message(61),
            "Too many attempts. Please try again in 2 minutes."
        );
        assert_eq!(
            too_many_attempts_message(3600),
            "Too many attempts. Please try again in 60 minutes."
        );
    }

    #[test]
    fn test_fail_open_renders_no_quota_headers() {
        let renderer = ResponseRenderer::new(&WindowPolicy::default());
        let response = renderer.render(&Decision::Allowed { quotas: Vec::new() });

        assert_eq!(response.status, 200);
        assert!(response.headers.is_empty());
    }
}
