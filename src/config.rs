//! Configuration management for the window counter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{CounterError, Result};
use crate::ratelimit::{constant_incrementer, RateIncrementer};
use crate::store::sql::{DEFAULT_PROCEDURE, DEFAULT_TABLE};

/// Prefix for environment variable overrides, e.g. `WINDOW_COUNTER__SWEEPER__ENABLED`.
pub const ENV_PREFIX: &str = "WINDOW_COUNTER";

/// Main configuration for the window counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Backing store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Constant weight applied to every request instead of 1.0
    #[serde(default)]
    pub rate_increment: Option<f64>,

    /// Expiry sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which store backs the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store; counters are not shared between processes
    Memory,
    /// Redis, using a server-side script
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`
        url: String,
    },
    /// Postgres, using a stored increment function
    Postgres {
        /// Connection URL
        url: String,
        /// Pool size
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Increment function name
        #[serde(default = "default_procedure")]
        procedure: String,
        /// Counters table name
        #[serde(default = "default_table")]
        table: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_procedure() -> String {
    DEFAULT_PROCEDURE.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

/// Expiry sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether the sweeper may run. `Sweeper::from_config` refuses to build
    /// one when this is false.
    #[serde(default)]
    pub enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sweep_interval(),
        }
    }
}

impl SweeperConfig {
    /// Sweep interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_sweep_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CounterConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CounterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CounterError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with `WINDOW_COUNTER__*` environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading counter configuration");

        let config: CounterConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CounterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if let Some(weight) = self.rate_increment {
            if !weight.is_finite() {
                return Err(CounterError::Config(format!(
                    "rate_increment must be finite, got {}",
                    weight
                )));
            }
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(CounterError::Config(
                "sweeper.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured rate incrementer, if any.
    pub fn rate_incrementer(&self) -> Option<RateIncrementer> {
        self.rate_increment.map(constant_incrementer)
    }
}
