//! Settle Server - runs the reconciliation scheduler against the Redis queue.

use std::sync::Arc;

use settle_core::{
    config::Config,
    jobs::{JobQueue, RedisQueueBackend},
    reconciliation::{QueueDispatcher, ReconciliationScheduler},
    telemetry::{self, SensitiveFieldRedactor, TelemetryConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("SETTLE_CONFIG").ok();
    let config = Config::load_from(config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    let telemetry_config = TelemetryConfig::new(config.logging.clone(), config.metrics.clone());
    let metrics = telemetry::init_telemetry(&telemetry_config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        metrics_addr = ?metrics.listen_addr,
        "Starting Settle Server"
    );

    let backend = RedisQueueBackend::connect(&config.redis.url, config.redis.queue_prefix.clone())?;
    tracing::info!(
        redis = %SensitiveFieldRedactor::global().redact_value(&config.redis.url),
        prefix = %config.redis.queue_prefix,
        "Redis queue configured"
    );

    let queue = Arc::new(JobQueue::new(Arc::new(backend), config.queue.clone()));
    let dispatcher = Arc::new(QueueDispatcher::new(queue));
    let scheduler = Arc::new(ReconciliationScheduler::from_config(
        dispatcher,
        config.reconciliation.clone(),
    ));

    if let Err(e) = scheduler.start() {
        e.log();
        return Err(e.into());
    }

    shutdown_signal().await;

    scheduler.stop();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
