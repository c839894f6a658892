//! Background job system for Settle Core.
//!
//! This module provides the queue side of reconciliation dispatch:
//!
//! - **Job Definitions**: Identity, priority, retry and backoff support
//! - **Queue**: In-memory and Redis backends with delayed jobs, priorities,
//!   pause/resume and a dead letter queue
//! - **Worker**: Concurrent job execution through registered handlers, with
//!   retries and graceful shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                        Background Job System                          │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                │
//! │  │ Dispatcher  │    │    Queue    │    │   Worker    │                │
//! │  │ (enqueue +  │───▶│  (Redis/    │───▶│ (handlers,  │                │
//! │  │   delay)    │    │  Priority)  │    │  retries)   │                │
//! │  └─────────────┘    └─────────────┘    └─────────────┘                │
//! │                            │                  │                       │
//! │                            ▼                  ▼                       │
//! │                     ┌─────────────────────────────┐                   │
//! │                     │      Dead Letter Queue      │                   │
//! │                     └─────────────────────────────┘                   │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use settle_core::jobs::{JobQueue, JobWorker, WorkerConfig};
//!
//! let queue = Arc::new(JobQueue::in_memory());
//! let handle = JobWorker::new(WorkerConfig::default())
//!     .with_handler(Arc::new(MyReconciliationHandler::new()))
//!     .start(queue.clone());
//!
//! // later
//! handle.shutdown();
//! handle.join().await;
//! ```

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{
    BackoffStrategy, JobError, JobHandle, JobId, JobMetadata, JobPriority, JobResult, JobStatus,
    RetryPolicy,
};
pub use queue::{
    DeadLetterQueue, InMemoryQueueBackend, JobQueue, QueueBackend, QueueConfig, QueueStats,
    QueuedJob, RedisQueueBackend, DEFAULT_QUEUE_PREFIX,
};
pub use worker::{
    JobContext, JobHandler, JobOutcome, JobWorker, WorkerConfig, WorkerHandle, WorkerStats,
};
