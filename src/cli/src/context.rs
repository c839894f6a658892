//! Shared state for command execution.

use std::sync::Arc;

use anyhow::{Context, Result};
use settle_core::config::Config;
use settle_core::jobs::{JobQueue, RedisQueueBackend};
use settle_core::reconciliation::{QueueDispatcher, ReconciliationScheduler};
use settle_core::telemetry::SensitiveFieldRedactor;

use crate::output::OutputFormat;

/// Loaded configuration plus the selected output format.
pub struct CliContext {
    pub config: Config,
    pub format: OutputFormat,
}

impl CliContext {
    pub fn load(path: Option<&str>, format: OutputFormat) -> Result<Self> {
        let config = Config::load_from(path).context("failed to load configuration")?;
        Ok(Self { config, format })
    }

    /// Redis URL with credentials masked.
    pub fn redis_display(&self) -> String {
        SensitiveFieldRedactor::global().redact_value(&self.config.redis.url)
    }

    /// Queue backed by the configured Redis instance.
    pub fn queue(&self) -> Result<Arc<JobQueue>> {
        let backend = RedisQueueBackend::connect(
            &self.config.redis.url,
            self.config.redis.queue_prefix.clone(),
        )
        .with_context(|| format!("failed to connect to {}", self.redis_display()))?;
        Ok(Arc::new(JobQueue::new(
            Arc::new(backend),
            self.config.queue.clone(),
        )))
    }

    /// Scheduler wired to the Redis queue. Timers are never started here.
    pub fn scheduler(&self) -> Result<ReconciliationScheduler> {
        let dispatcher = Arc::new(QueueDispatcher::new(self.queue()?));
        Ok(ReconciliationScheduler::from_config(
            dispatcher,
            self.config.reconciliation.clone(),
        ))
    }
}
