//! # Runtime Configuration
//!
//! Startup configuration for the coordination layer, read once before anything else
//! runs. Every field has a default so an empty file (or no file at all) yields the
//! Algerian defaults: `ar_DZ`, `Africa/Algiers`, UTF-8, DZD.
//!
//! ```toml
//! locale = "fr_DZ"
//!
//! [cache.tva_rates]
//! max_size = 256
//! ttl = "10m"
//!
//! [executor]
//! pool_size = 8
//! queue_depth = 128
//! drain_grace_period = "15s"
//!
//! [job.g50_reminder]
//! trigger = { cron = "0 0 8 15 * *" }
//! concurrency_policy = "skip_if_running"
//! ```

use crate::environment::EnvironmentSettings;
use crate::scheduler::ConcurrencyPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOCALE: &str = "ar_DZ";
pub const DEFAULT_TIMEZONE: &str = "Africa/Algiers";
pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_CURRENCY: &str = "DZD";

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Environment variable consulted when no `--config` argument is given.
pub const CONFIG_ENV_VAR: &str = "ERP_RUNTIME_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level configuration object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub locale: String,
    pub timezone: String,
    pub encoding: String,
    pub currency: String,
    /// Per named cache bounds, keyed by cache name.
    pub cache: BTreeMap<String, CachePolicy>,
    pub executor: ExecutorConfig,
    /// Per job trigger and concurrency policy, keyed by job name.
    pub job: BTreeMap<String, JobConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            cache: BTreeMap::new(),
            executor: ExecutorConfig::default(),
            job: BTreeMap::new(),
        }
    }
}

/// Eviction bounds of a single named cache. Both bounds are optional and combine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachePolicy {
    /// Least-recently-used entries are evicted beyond this many entries.
    pub max_size: Option<usize>,
    /// Entries expire this long after they were written.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Worker pool sizing and shutdown behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    pub pool_size: usize,
    pub queue_depth: usize,
    #[serde(with = "humantime_serde")]
    pub drain_grace_period: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            drain_grace_period: DEFAULT_DRAIN_GRACE_PERIOD,
        }
    }
}

/// Declarative job schedule, bound to a task at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default, with = "humantime_serde")]
    pub initial_delay: Option<Duration>,
}

/// Trigger specification as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConfig {
    FixedRate(#[serde(with = "humantime_serde")] Duration),
    FixedDelay(#[serde(with = "humantime_serde")] Duration),
    Cron(String),
}

impl RuntimeConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks structural bounds. Locale, timezone and encoding are checked by the
    /// environment initializer, not here, so that their failure stays fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "currency".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for (name, policy) in &self.cache {
            if policy.max_size == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("cache.{name}.max_size"),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for (name, job) in &self.job {
            let zero_period = match &job.trigger {
                TriggerConfig::FixedRate(period) => period.is_zero(),
                TriggerConfig::FixedDelay(_) | TriggerConfig::Cron(_) => false,
            };
            if zero_period {
                return Err(ConfigError::InvalidValue {
                    field: format!("job.{name}.trigger"),
                    reason: "fixed_rate period must be positive".to_string(),
                });
            }
            if matches!(job.trigger, TriggerConfig::Cron(_)) && job.initial_delay.is_some() {
                return Err(ConfigError::InvalidValue {
                    field: format!("job.{name}.initial_delay"),
                    reason: "not supported with a cron trigger".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn environment_settings(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            locale: self.locale.clone(),
            timezone: self.timezone.clone(),
            encoding: self.encoding.clone(),
            currency: self.currency.clone(),
        }
    }
}
