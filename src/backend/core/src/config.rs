//! Configuration management.
//!
//! Values come from an optional config file, then `SETTLE__*` environment
//! variables (e.g. `SETTLE__RECONCILIATION__TIMEZONE=UTC`). Every section has
//! defaults, so an empty environment yields a working local setup.

use serde::Deserialize;

use crate::error::{Result, SettleError};
use crate::jobs::{QueueConfig, WorkerConfig, DEFAULT_QUEUE_PREFIX};
use crate::reconciliation::CadenceKind;
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queue limits and retry budget
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker runtime configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Reconciliation schedule configuration
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prometheus exporter configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every queue key
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            queue_prefix: default_queue_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// IANA timezone the cron rules are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Cron rule for the 15-minute sweep of unconfirmed orders
    #[serde(default = "default_frequent_cron")]
    pub frequent_cron: String,

    /// Cron rule for the 6-hourly sweep of all orders
    #[serde(default = "default_regular_cron")]
    pub regular_cron: String,

    /// Cron rule for the nightly weekly-window sweep
    #[serde(default = "default_comprehensive_cron")]
    pub comprehensive_cron: String,

    /// Largest window an operator may request manually
    #[serde(default = "default_max_manual_hours")]
    pub max_manual_hours: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            frequent_cron: default_frequent_cron(),
            regular_cron: default_regular_cron(),
            comprehensive_cron: default_comprehensive_cron(),
            max_manual_hours: default_max_manual_hours(),
        }
    }
}

impl ReconciliationConfig {
    /// Configured cron rule for a cadence.
    pub fn cron_for(&self, kind: CadenceKind) -> &str {
        match kind {
            CadenceKind::Frequent => &self.frequent_cron,
            CadenceKind::Regular => &self.regular_cron,
            CadenceKind::Comprehensive => &self.comprehensive_cron,
        }
    }

    /// Reject a manual window larger than the configured ceiling.
    pub fn check_manual_window(&self, hours: u32) -> Result<()> {
        if hours > self.max_manual_hours {
            return Err(SettleError::invalid_input(
                "time_range_hours",
                format!(
                    "Manual reconciliation window of {}h exceeds the {}h limit",
                    hours, self.max_manual_hours
                ),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_queue_prefix() -> String { DEFAULT_QUEUE_PREFIX.to_string() }
fn default_timezone() -> String { "Africa/Lagos".to_string() }
fn default_frequent_cron() -> String { CadenceKind::Frequent.default_cron().to_string() }
fn default_regular_cron() -> String { CadenceKind::Regular.default_cron().to_string() }
fn default_comprehensive_cron() -> String { CadenceKind::Comprehensive.default_cron().to_string() }
fn default_max_manual_hours() -> u32 { 720 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SETTLE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SETTLE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from `path` when given, otherwise from the environment alone.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.redis.queue_prefix, "settle:queue");
        assert_eq!(config.reconciliation.timezone, "Africa/Lagos");
        assert_eq!(config.reconciliation.frequent_cron, "0 */15 * * * *");
        assert_eq!(config.reconciliation.regular_cron, "0 0 */6 * * *");
        assert_eq!(config.reconciliation.comprehensive_cron, "0 0 2 * * *");
        assert_eq!(config.reconciliation.max_manual_hours, 720);
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[test]
    fn test_manual_window_limit() {
        let config = ReconciliationConfig::default();
        assert!(config.check_manual_window(720).is_ok());
        let err = config.check_manual_window(721).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidInput);
    }

    #[test]
    fn test_from_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
queue_prefix = "shop:recon"

[reconciliation]
timezone = "UTC"
max_manual_hours = 48

[queue]
max_attempts = 5
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.redis.queue_prefix, "shop:recon");
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.reconciliation.timezone, "UTC");
        assert_eq!(config.reconciliation.max_manual_hours, 48);
        assert_eq!(config.reconciliation.regular_cron, "0 0 */6 * * *");
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.max_size, 10_000);
    }
}
