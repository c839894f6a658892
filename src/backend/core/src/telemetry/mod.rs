//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: Structured JSON/pretty logging with sensitive data redaction
//! - **Metrics**: Prometheus counters for dispatch, queue depth, workers and errors
//!
//! # Example
//!
//! ```rust,no_run
//! use settle_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = TelemetryConfig::default();
//! let _registry = init_telemetry(&config)?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, ReconciliationMetrics};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name for identification in logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Assemble from the logging and metrics sections of the app config.
    pub fn new(logging: LoggingConfig, metrics: MetricsConfig) -> Self {
        Self {
            logging,
            metrics,
            ..Self::default()
        }
    }
}

fn default_service_name() -> String {
    "settle-core".to_string()
}

fn default_environment() -> String {
    std::env::var("SETTLE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize logging, then metrics.
///
/// Call once at startup, inside the tokio runtime.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<MetricsRegistry> {
    init_logging(&config.logging, &config.environment)?;
    init_metrics(&config.metrics, &config.service_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "settle-core");
        assert!(!config.environment.is_empty());
    }
}
