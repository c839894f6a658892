//! Typed entry point for enqueueing reconciliation jobs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::request::ReconciliationJobRequest;
use crate::error::Result;
use crate::jobs::{JobHandle, JobMetadata, JobQueue, QueuedJob};

/// Job type the reconciliation worker consumes.
pub const PAYMENT_RECONCILIATION_JOB: &str = "payment-reconciliation";

/// Per-enqueue options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// How long the job waits before it becomes eligible
    pub delay: Duration,
}

impl DispatchOptions {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn delayed(delay: Duration) -> Self {
        Self { delay }
    }
}

/// Enqueues payment reconciliation jobs.
#[async_trait]
pub trait ReconciliationDispatcher: Send + Sync {
    /// Enqueue one reconciliation job.
    ///
    /// Queue errors are returned unchanged.
    async fn add_payment_reconciliation_job(
        &self,
        request: &ReconciliationJobRequest,
        options: DispatchOptions,
    ) -> Result<JobHandle>;
}

/// Dispatcher backed by a [`JobQueue`].
pub struct QueueDispatcher {
    queue: Arc<JobQueue>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

#[async_trait]
impl ReconciliationDispatcher for QueueDispatcher {
    async fn add_payment_reconciliation_job(
        &self,
        request: &ReconciliationJobRequest,
        options: DispatchOptions,
    ) -> Result<JobHandle> {
        let metadata = JobMetadata::new(PAYMENT_RECONCILIATION_JOB)
            .with_priority(request.priority())
            .with_max_attempts(self.queue.config().max_attempts)
            .with_tag(request.reconciliation_type().as_str())
            .delayed_by(options.delay);

        let payload = serde_json::to_value(request)?;
        let mut job = QueuedJob::new(metadata, payload);
        job.enqueued_at = job.metadata.created_at;
        let handle = job.metadata.handle();

        self.queue.enqueue(job).await?;

        tracing::debug!(
            job_id = %handle.id,
            reconciliation_type = %request.reconciliation_type(),
            priority = %handle.priority,
            eligible_at = %handle.eligible_at,
            "Reconciliation job enqueued"
        );

        Ok(handle)
    }
}
