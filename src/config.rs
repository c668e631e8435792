//! Configuration management for Tollgate.
//!
//! Configuration is layered: an optional YAML file, then `TOLLGATE_*`
//! environment variables (`__` separates nested keys, e.g.
//! `TOLLGATE_LIMITER__FAILURE_POLICY=open`), then the per-period
//! `RATE_LIMIT_PER_<PERIOD>` limit overrides.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::admission::{
    AdmissionController, FailurePolicy, HeaderOverride, IdentityResolver, IdentitySource,
    ResponseRenderer, DEFAULT_UNAVAILABLE_RETRY_AFTER_SECS,
};
use crate::error::{Result, TollgateError};
use crate::ratelimit::{
    default_period_configs, Clock, CounterStore, PeriodConfig, RateLimiter, WindowPolicy,
    DEFAULT_KEY_PREFIX,
};

/// Prefix of the per-period limit override variables.
pub const LIMIT_OVERRIDE_PREFIX: &str = "RATE_LIMIT_PER_";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Engine and failure handling
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Periods in evaluation order
    #[serde(default = "default_period_configs")]
    pub periods: Vec<PeriodConfig>,

    /// Header name overrides keyed by period name
    #[serde(default)]
    pub headers: HashMap<String, HeaderOverride>,

    /// Identity derivation
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            periods: default_period_configs(),
            headers: HashMap::new(),
            identity: IdentityConfig::default(),
        }
    }
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Behavior when the counter store fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// `Retry-After` sent when failing closed
    #[serde(default = "default_unavailable_retry_after")]
    pub unavailable_retry_after_secs: u64,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Interval of the expired-counter sweeper in seconds, 0 disables it
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            store_timeout_ms: default_store_timeout_ms(),
            unavailable_retry_after_secs: default_unavailable_retry_after(),
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl LimiterConfig {
    /// Store call timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Sweeper interval, `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_unavailable_retry_after() -> u64 {
    DEFAULT_UNAVAILABLE_RETRY_AFTER_SECS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

/// Identity derivation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Strategy used to derive the identity
    #[serde(default)]
    pub source: IdentitySource,

    /// Attribute read by the `custom` strategy
    #[serde(default = "default_custom_parameter")]
    pub custom_parameter: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            source: IdentitySource::default(),
            custom_parameter: default_custom_parameter(),
        }
    }
}

fn default_custom_parameter() -> String {
    "api_key".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }

        let mut config: TollgateConfig = builder
            .add_source(
                Environment::with_prefix("TOLLGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.apply_limit_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?)
    }

    /// Replace period limits from `RATE_LIMIT_PER_<PERIOD>` variables.
    ///
    /// The period name is upper-cased with `-` mapped to `_`, so `minute`
    /// reads `RATE_LIMIT_PER_MINUTE`.
    pub fn apply_limit_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for period in &mut self.periods {
            let var = format!(
                "{}{}",
                LIMIT_OVERRIDE_PREFIX,
                period.name.to_uppercase().replace('-', "_")
            );
            if let Some(value) = lookup(&var) {
                let limit = value.trim().parse::<u64>().map_err(|e| {
                    TollgateError::Config(format!("{} must be a non-negative integer: {}", var, e))
                })?;
                debug!(period = %period.name, limit, "Applying limit override");
                period.max_attempts = limit;
            }
        }
        Ok(())
    }

    /// Validated window policy.
    pub fn window_policy(&self) -> Result<WindowPolicy> {
        WindowPolicy::from_configs(&self.periods)
    }

    /// Identity resolver for the configured strategy.
    pub fn identity_resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.identity.source, self.identity.custom_parameter.clone())
    }

    /// Response renderer with the configured header names.
    pub fn response_renderer(&self, policy: &WindowPolicy) -> Result<ResponseRenderer> {
        ResponseRenderer::with_overrides(policy, &self.headers)
    }

    /// Build an admission controller over `store`.
    ///
    /// Fails with `InvalidPeriod` when the periods or header overrides are
    /// inconsistent and with `Config` for an unusable key prefix, so
    /// misconfiguration is caught before the first request.
    pub fn build_controller<S: CounterStore>(
        &self,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<AdmissionController<S>> {
        let policy = self.window_policy()?;
        self.response_renderer(&policy)?;

        let limiter = RateLimiter::new(store, policy)
            .with_clock(clock)
            .with_key_prefix(self.limiter.key_prefix.clone())?
            .with_store_timeout(self.limiter.store_timeout());

        Ok(AdmissionController::new(limiter)
            .with_failure_policy(self.limiter.failure_policy)
            .with_unavailable_retry_after(self.limiter.unavailable_retry_after_secs))
    }
}
