//! Window policy configuration and lookup.
//!
//! A policy is an ordered list of periods. The order is significant: it is
//! the order in which periods are checked, hit and reported.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TollgateError};

/// Time unit shorthand for period durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Raw period definition as it appears in configuration.
///
/// Exactly one of `duration_secs` and `unit` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// Period name, also used in counter keys and header names
    pub name: String,
    /// Maximum attempts allowed per window
    pub max_attempts: u64,
    /// Window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// Window length as a unit shorthand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
}

impl PeriodConfig {
    /// Period config using a unit shorthand.
    pub fn with_unit(name: &str, max_attempts: u64, unit: TimeUnit) -> Self {
        Self {
            name: name.to_string(),
            max_attempts,
            duration_secs: None,
            unit: Some(unit),
        }
    }
}

/// One independently tracked window and its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    name: String,
    duration: Duration,
    max_attempts: u64,
}

impl Period {
    /// Create a validated period.
    ///
    /// Names are case-insensitive and stored lower-cased, matching how
    /// configuration map keys (such as header overrides) come back.
    pub fn new(name: &str, duration: Duration, max_attempts: u64) -> Result<Self> {
        validate_name(name)?;
        let name = name.to_ascii_lowercase();
        if duration.is_zero() {
            warn!(
                period = %name,
                "Period has a zero duration; its counters expire immediately"
            );
        }
        Ok(Self {
            name,
            duration,
            max_attempts,
        })
    }

    /// Period name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Window length, used as the TTL of this period's counters.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Maximum attempts allowed per window.
    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }
}

impl TryFrom<&PeriodConfig> for Period {
    type Error = TollgateError;

    fn try_from(config: &PeriodConfig) -> Result<Self> {
        let duration = match (config.duration_secs, config.unit) {
            (Some(secs), None) => Duration::from_secs(secs),
            (None, Some(unit)) => unit.duration(),
            (Some(_), Some(_)) => {
                return Err(TollgateError::InvalidPeriod(format!(
                    "period '{}' sets both duration_secs and unit",
                    config.name
                )))
            }
            (None, None) => {
                return Err(TollgateError::InvalidPeriod(format!(
                    "period '{}' needs either duration_secs or unit",
                    config.name
                )))
            }
        };
        Period::new(&config.name, duration, config.max_attempts)
    }
}

/// Period names end up inside counter keys, so they may not contain the
/// key separator or anything else outside `[A-Za-z0-9_-]`.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TollgateError::InvalidPeriod("period name must not be empty".to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(TollgateError::InvalidPeriod(format!(
            "period name '{}' may only contain ASCII letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Default period configuration: 60/minute, 1000/hour, 10000/day.
pub fn default_period_configs() -> Vec<PeriodConfig> {
    vec![
        PeriodConfig::with_unit("minute", 60, TimeUnit::Minute),
        PeriodConfig::with_unit("hour", 1000, TimeUnit::Hour),
        PeriodConfig::with_unit("day", 10000, TimeUnit::Day),
    ]
}

/// Ordered, immutable set of periods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    periods: Vec<Period>,
}

#[derive(Deserialize)]
struct PolicyFile {
    periods: Vec<PeriodConfig>,
}

impl WindowPolicy {
    /// Build a policy from already constructed periods.
    pub fn new(periods: Vec<Period>) -> Result<Self> {
        if periods.is_empty() {
            return Err(TollgateError::InvalidPeriod(
                "window policy needs at least one period".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for period in &periods {
            if !seen.insert(period.name()) {
                return Err(TollgateError::InvalidPeriod(format!(
                    "duplicate period '{}'",
                    period.name()
                )));
            }
        }

        Ok(Self { periods })
    }

    /// Build a policy from raw period configs.
    pub fn from_configs(configs: &[PeriodConfig]) -> Result<Self> {
        let periods = configs
            .iter()
            .map(Period::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(periods)
    }

    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading window policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    ///
    /// Accepts either a bare list of periods or a mapping with a `periods` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(configs) = serde_yaml::from_str::<Vec<PeriodConfig>>(yaml) {
            return Self::from_configs(&configs);
        }

        let file: PolicyFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse window policy: {}", e)))?;
        Self::from_configs(&file.periods)
    }

    /// Periods in evaluation order.
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// Look up a period by name, ignoring case.
    pub fn period(&self, name: &str) -> Result<&Period> {
        self.periods
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| TollgateError::InvalidPeriod(format!("unknown period '{}'", name)))
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    /// Always false for a validated policy.
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            periods: vec![
                Period {
                    name: "minute".to_string(),
                    duration: TimeUnit::Minute.duration(),
                    max_attempts: 60,
                },
                Period {
                    name: "hour".to_string(),
                    duration: TimeUnit::Hour.duration(),
                    max_attempts: 1000,
                },
                Period {
                    name: "day".to_string(),
                    duration: TimeUnit::Day.duration(),
                    max_attempts: 10000,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = WindowPolicy::default();
        let names: Vec<_> = policy.periods().iter().map(Period::name).collect();
        assert_eq!(names, vec!["minute", "hour", "day"]);

        let hour = policy.period("hour").unwrap();
        assert_eq!(hour.duration(), Duration::from_secs(3600));
        assert_eq!(hour.max_attempts(), 1000);
    }

    #[test]
    fn test_default_configs_match_default_policy() {
        let policy = WindowPolicy::from_configs(&default_period_configs()).unwrap();
        assert_eq!(policy, WindowPolicy::default());
    }

    #[test]
    fn test_parse_period_list() {
        let yaml = r#"
- name: minute
  max_attempts: 10
  unit: minute
- name: burst
  max_attempts: 3
  duration_secs: 5
"#;
        let policy = WindowPolicy::from_yaml(yaml).unwrap();
        assert_eq!(policy.len(), 2);
        assert_eq!(policy.periods()[0].name(), "minute");
        assert_eq!(policy.periods()[1].duration(), Duration::from_secs(5));
        assert_eq!(policy.periods()[1].max_attempts(), 3);
    }

    #[test]
    fn test_parse_periods_mapping() {
        let yaml = r#"
periods:
  - name: hour
    max_attempts: 100
    unit: hour
"#;
        let policy = WindowPolicy::from_yaml(yaml).unwrap();
        assert_eq!(policy.period("hour").unwrap().max_attempts(), 100);
    }

    #[test]
    fn test_unknown_period_rejected() {
        let policy = WindowPolicy::default();
        let err = policy.period("week").unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPeriod(_)));
    }

    #[test]
    fn test_duplicate_period_rejected() {
        let configs = vec![
            PeriodConfig::with_unit("minute", 10, TimeUnit::Minute),
            PeriodConfig::with_unit("minute", 20, TimeUnit::Minute),
        ];
        let err = WindowPolicy::from_configs(&configs).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPeriod(_)));
    }

    #[test]
    fn test_empty_policy_rejected() {
        assert!(WindowPolicy::new(Vec::new()).is_err());
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(Period::new("", Duration::from_secs(1), 1).is_err());
        assert!(Period::new("per:minute", Duration::from_secs(1), 1).is_err());
        assert!(Period::new("has space", Duration::from_secs(1), 1).is_err());
        assert!(Period::new("ten-seconds_2", Duration::from_secs(10), 1).is_ok());
    }

    #[test]
    fn test_names_are_lower_cased() {
        let period = Period::new("Burst", Duration::from_secs(5), 3).unwrap();
        assert_eq!(period.name(), "burst");

        let policy = WindowPolicy::new(vec![period]).unwrap();
        assert_eq!(policy.period("BURST").unwrap().name(), "burst");
    }

    #[test]
    fn test_names_differing_only_in_case_are_duplicates() {
        let configs = vec![
            PeriodConfig::with_unit("Minute", 10, TimeUnit::Minute),
            PeriodConfig::with_unit("minute", 20, TimeUnit::Minute),
        ];
        let err = WindowPolicy::from_configs(&configs).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidPeriod(_)));
    }

    #[test]
    fn test_duration_source_must_be_unique() {
        let both = PeriodConfig {
            name: "minute".to_string(),
            max_attempts: 1,
            duration_secs: Some(60),
            unit: Some(TimeUnit::Minute),
        };
        let neither = PeriodConfig {
            name: "minute".to_string(),
            max_attempts: 1,
            duration_secs: None,
            unit: None,
        };
        assert!(Period::try_from(&both).is_err());
        assert!(Period::try_from(&neither).is_err());
    }

    #[test]
    fn test_zero_duration_accepted() {
        let period = Period::new("instant", Duration::ZERO, 5).unwrap();
        assert!(period.duration().is_zero());
    }

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }
}
