//! Prometheus metrics for reconciliation dispatch, the job queue and workers.
//!
//! # Example
//!
//! ```rust,no_run
//! use settle_core::telemetry::metrics::ReconciliationMetrics;
//!
//! ReconciliationMetrics::record_dispatched("frequent", "scheduled", 0.004);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Prometheus scrape listener (e.g., "0.0.0.0:9090")
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for dispatch durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

// Default value functions
fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
}

/// What `init_metrics` installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsRegistry {
    /// Address the scrape endpoint listens on, if the exporter is running
    pub listen_addr: Option<SocketAddr>,
}

/// Initialize the metrics subsystem and start the scrape listener.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the endpoint is not a socket address or the recorder
/// cannot be installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry { listen_addr: None });
    }

    let addr: SocketAddr = config.endpoint.parse()?;

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", service_name);

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;
    builder.install()?;

    register_metric_descriptions();

    tracing::info!(
        service_name = %service_name,
        endpoint = %addr,
        "Metrics initialized"
    );

    Ok(MetricsRegistry {
        listen_addr: Some(addr),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    // Reconciliation dispatch
    describe_counter!(
        "settle_reconciliation_dispatched_total",
        "Reconciliation jobs enqueued, by cadence and type"
    );
    describe_counter!(
        "settle_reconciliation_dispatch_failures_total",
        "Reconciliation enqueue attempts that failed, by cadence and type"
    );
    describe_histogram!(
        "settle_reconciliation_dispatch_duration_seconds",
        "Time spent enqueueing a reconciliation job"
    );

    // Queue
    describe_counter!("settle_queue_enqueued_total", "Jobs accepted by the queue");
    describe_gauge!("settle_queue_pending", "Jobs eligible to run");
    describe_gauge!("settle_queue_delayed", "Jobs waiting for their delay");
    describe_gauge!("settle_queue_dead_letter", "Jobs in the dead letter queue");

    // Workers
    describe_counter!(
        "settle_worker_jobs_total",
        "Job attempts finished by workers, by outcome"
    );

    // Errors
    describe_counter!("settle_errors_total", "Errors raised, by code and severity");
}

/// Reconciliation dispatch metrics.
pub struct ReconciliationMetrics;

impl ReconciliationMetrics {
    /// Record a successful enqueue.
    pub fn record_dispatched(cadence: &str, reconciliation_type: &str, duration_seconds: f64) {
        counter!(
            "settle_reconciliation_dispatched_total",
            "cadence" => cadence.to_string(),
            "type" => reconciliation_type.to_string(),
        )
        .increment(1);

        histogram!(
            "settle_reconciliation_dispatch_duration_seconds",
            "cadence" => cadence.to_string(),
        )
        .record(duration_seconds);
    }

    /// Record a failed enqueue.
    pub fn record_dispatch_failed(cadence: &str, reconciliation_type: &str) {
        counter!(
            "settle_reconciliation_dispatch_failures_total",
            "cadence" => cadence.to_string(),
            "type" => reconciliation_type.to_string(),
        )
        .increment(1);
    }
}
