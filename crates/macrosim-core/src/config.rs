//! Configuration loading and typed config structures for the macrosim kernel.
//!
//! The canonical configuration lives in `macrosim-config.yaml` at the
//! project root. This module defines the sections the kernel reads
//! (`world`, `time`, `market`, `logging`); sector crates read their own
//! sections from the same file and ignore these.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Environment variable overriding `world.seed`.
pub const SEED_ENV: &str = "MACROSIM_SEED";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Run name and seed.
    #[serde(default)]
    pub world: WorldConfig,

    /// Calendar origin and horizon.
    #[serde(default)]
    pub time: TimeConfig,

    /// Matching engine tuning.
    #[serde(default)]
    pub market: MarketConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `MACROSIM_SEED` overrides `world.seed` when set to an integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.world.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=12).contains(&self.time.start_month) {
            return Err(ConfigError::Invalid {
                field: "time.start_month",
                reason: format!("must be 1-12, got {}", self.time.start_month),
            });
        }
        if self.market.probe_retry_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "market.probe_retry_cap",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Human-readable run name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Seed of the shared random stream.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl WorldConfig {
    /// Apply `MACROSIM_SEED` if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the variable is set but is not
    /// an unsigned integer.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var(SEED_ENV) {
            self.seed = val.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "world.seed",
                reason: format!("{SEED_ENV}={val}: {e}"),
            })?;
        }
        Ok(())
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Calendar configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Calendar year of period 0.
    #[serde(default = "default_start_year")]
    pub start_year: i32,

    /// Calendar month (1-12) of period 0.
    #[serde(default = "default_start_month")]
    pub start_month: u32,

    /// Number of periods in the run (0 = unlimited).
    #[serde(default = "default_horizon_periods")]
    pub horizon_periods: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start_year: default_start_year(),
            start_month: default_start_month(),
            horizon_periods: default_horizon_periods(),
        }
    }
}

/// Matching engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Live pool size at or below which a request scans and permutes the
    /// whole pool instead of probing random indices.
    #[serde(default = "default_full_scan_threshold")]
    pub full_scan_threshold: usize,

    /// Failed probes (exhausted or already-seen offers) tolerated per
    /// request before it gives up.
    ///
    /// Random draws land on every slot of the pool, exhausted ones included. A
    /// large pool with few live offers therefore often yields a short or
    /// empty sample even though live supply remains; raise
    /// `full_scan_threshold` for such pools.
    #[serde(default = "default_probe_retry_cap")]
    pub probe_retry_cap: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            full_scan_threshold: default_full_scan_threshold(),
            probe_retry_cap: default_probe_retry_cap(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG`
    /// is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of the human-readable format.
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

fn default_world_name() -> String {
    "Macrosim".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_start_year() -> i32 {
    2000
}

const fn default_start_month() -> u32 {
    1
}

const fn default_horizon_periods() -> u64 {
    120
}

const fn default_full_scan_threshold() -> usize {
    64
}

const fn default_probe_retry_cap() -> u32 {
    32
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.time.horizon_periods, 120);
        assert_eq!(config.market.full_scan_threshold, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
world:
  name: "Test Economy"
  seed: 123

time:
  start_year: 1990
  start_month: 6
  horizon_periods: 24

market:
  full_scan_threshold: 8
  probe_retry_cap: 5

logging:
  level: "debug"
  json: true

firms:
  count: 10
"#;

        let config = SimulationConfig::parse(yaml);
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.world.name, "Test Economy");
        assert_eq!(config.world.seed, 123);
        assert_eq!(config.time.start_month, 6);
        assert_eq!(config.time.horizon_periods, 24);
        assert_eq!(config.market.probe_retry_cap, 5);
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = SimulationConfig::parse("world:\n  seed: 7\n");
        let config = config.ok().unwrap_or_default();
        assert_eq!(config.world.seed, 7);
        assert_eq!(config.time.start_year, 2000);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SimulationConfig::parse("").is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_month = SimulationConfig::parse("time:\n  start_month: 0\n");
        assert!(matches!(
            bad_month,
            Err(ConfigError::Invalid {
                field: "time.start_month",
                ..
            })
        ));
        let bad_cap = SimulationConfig::parse("market:\n  probe_retry_cap: 0\n");
        assert!(bad_cap.is_err());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("macrosim-config.yaml");
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
