//! Job worker for concurrent job execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{JobError, JobId, JobQueue, JobResult, QueuedJob, RetryPolicy};
use crate::error::{Result, SettleError};

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Context handed to a handler for one execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub worker: String,
}

impl JobContext {
    /// Whether a failure now would dead-letter the job.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Executes jobs of one type.
///
/// Jobs are delivered at least once and overlapping reconciliation windows are
/// never deduplicated upstream, so handlers must be idempotent per entity.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler consumes.
    fn job_type(&self) -> &'static str;

    /// Execute one attempt.
    async fn handle(&self, ctx: &JobContext, payload: &serde_json::Value) -> JobResult;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration & Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the job worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent job executions
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Poll interval for checking the queue (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Shutdown timeout (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Worker name/identifier
    #[serde(default = "default_worker_name")]
    pub name: String,
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_worker_name() -> String {
    "settle-worker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            name: default_worker_name(),
        }
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total attempts executed
    pub processed: Arc<AtomicU64>,
    /// Total attempts that succeeded
    pub succeeded: Arc<AtomicU64>,
    /// Total attempts that failed
    pub failed: Arc<AtomicU64>,
    /// Total jobs scheduled for another attempt
    pub retried: Arc<AtomicU64>,
    /// Total jobs moved to the dead letter queue
    pub dead_lettered: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Re-enqueued, eligible again after `delay`
    Retrying { delay: Duration },
    DeadLettered { reason: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    stats: WorkerStats,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the polling loop and in-flight jobs to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// Job worker that processes jobs from a queue.
#[derive(Clone)]
pub struct JobWorker {
    config: WorkerConfig,
    stats: WorkerStats,
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
    retry_policy: RetryPolicy,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            stats: WorkerStats::new(),
            handlers: Arc::new(HashMap::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Register a handler for its job type, replacing any previous one.
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        Arc::make_mut(&mut self.handlers).insert(handler.job_type().to_string(), handler);
        self
    }

    /// Backoff and retry rules. Per-job `max_attempts` still wins.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Dequeue and run at most one eligible job.
    pub async fn process_next(&self, queue: &JobQueue) -> Result<Option<JobOutcome>> {
        match queue.dequeue(Utc::now()).await? {
            Some(job) => Ok(Some(self.execute(queue, job).await)),
            None => Ok(None),
        }
    }

    /// Run one attempt of `job` and settle its fate in the queue.
    pub async fn execute(&self, queue: &JobQueue, mut job: QueuedJob) -> JobOutcome {
        let receipt = job.take_receipt();
        job.metadata.mark_running();
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let ctx = JobContext {
            job_id: job.metadata.id,
            job_type: job.metadata.job_type.clone(),
            attempt: job.metadata.attempts,
            max_attempts: job.metadata.max_attempts,
            enqueued_at: job.enqueued_at,
            worker: self.config.name.clone(),
        };

        let result = match self.handlers.get(&ctx.job_type) {
            Some(handler) => handler.handle(&ctx, &job.data).await,
            None => {
                let error = SettleError::handler_not_found(&ctx.job_type);
                error.log();
                Err(JobError::fatal(error.user_message()).with_code(error.code().to_string()))
            }
        };

        self.stats.active.fetch_sub(1, Ordering::Relaxed);

        let outcome = match result {
            Ok(()) => {
                job.metadata.mark_completed();
                queue.record_completed();
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    worker = %self.config.name,
                    job_id = %ctx.job_id,
                    job_type = %ctx.job_type,
                    attempt = ctx.attempt,
                    "Job completed"
                );
                JobOutcome::Completed
            }
            Err(error) => {
                queue.record_failed();
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.handle_failure(queue, job, &ctx, error).await
            }
        };

        // Acknowledge only once the outcome is recorded in the queue.
        if let Some(receipt) = receipt {
            if let Err(error) = queue.ack(&receipt).await {
                error.log();
            }
        }

        counter!(
            "settle_worker_jobs_total",
            "job_type" => ctx.job_type.clone(),
            "outcome" => outcome.label(),
        )
        .increment(1);

        outcome
    }

    async fn handle_failure(
        &self,
        queue: &JobQueue,
        mut job: QueuedJob,
        ctx: &JobContext,
        error: JobError,
    ) -> JobOutcome {
        let policy = RetryPolicy {
            max_attempts: job.metadata.max_attempts,
            ..self.retry_policy.clone()
        };

        if policy.should_retry(job.metadata.attempts, &error) {
            let delay = policy.next_retry_delay(job.metadata.attempts);
            job.metadata.mark_failed(&error.message, delay);

            match queue.requeue(job.clone()).await {
                Ok(()) => {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        worker = %self.config.name,
                        job_id = %ctx.job_id,
                        job_type = %ctx.job_type,
                        attempt = ctx.attempt,
                        retry_in_secs = delay.as_secs(),
                        error = %error,
                        "Job failed, retrying"
                    );
                    return JobOutcome::Retrying { delay };
                }
                Err(requeue_error) => {
                    requeue_error.log();
                    let reason = format!("{} (requeue failed: {})", error, requeue_error);
                    return self.bury(queue, job, ctx, reason);
                }
            }
        }

        self.bury(queue, job, ctx, error.to_string())
    }

    fn bury(&self, queue: &JobQueue, mut job: QueuedJob, ctx: &JobContext, reason: String) -> JobOutcome {
        job.metadata.mark_dead(&reason);
        queue.dead_letter(job);
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            worker = %self.config.name,
            job_id = %ctx.job_id,
            job_type = %ctx.job_type,
            attempts = ctx.attempt,
            reason = %reason,
            "Job moved to dead letter queue"
        );
        JobOutcome::DeadLettered { reason }
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self, queue: Arc<JobQueue>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let stats = self.stats.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let concurrency = config.concurrency.max(1);
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let poll_interval = Duration::from_millis(config.poll_interval_ms);

            tracing::info!(
                worker = %config.name,
                concurrency,
                handlers = ?self.handlers.keys().collect::<Vec<_>>(),
                "Job worker started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(worker = %config.name, "Worker shutting down");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        self.drain_ready(&queue, &semaphore).await;
                    }
                }
            }

            let in_flight = tokio::time::timeout(
                Duration::from_secs(config.shutdown_timeout_secs),
                semaphore.acquire_many(concurrency as u32),
            )
            .await;
            if in_flight.is_err() {
                tracing::warn!(
                    worker = %config.name,
                    timeout_secs = config.shutdown_timeout_secs,
                    "Shutdown timeout elapsed with jobs still running"
                );
            }

            tracing::info!(worker = %config.name, "Worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
            task,
        }
    }

    /// Spawn eligible jobs until the queue is empty or all permits are taken.
    async fn drain_ready(&self, queue: &Arc<JobQueue>, semaphore: &Arc<Semaphore>) {
        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                return;
            };

            let job = match queue.dequeue(Utc::now()).await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    e.log();
                    return;
                }
            };

            let worker = self.clone();
            let queue = Arc::clone(queue);
            tokio::spawn(async move {
                worker.execute(&queue, job).await;
                drop(permit);
            });
        }
    }
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retrying { .. } => "retrying",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}
