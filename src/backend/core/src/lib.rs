#![allow(clippy::result_large_err)]
//! # Settle Core
//!
//! Payment reconciliation scheduling and background job dispatch.
//!
//! ## Architecture
//!
//! - **Reconciliation**: Cron cadences in the shop's timezone, plus manual and
//!   emergency triggers, that enqueue `payment-reconciliation` jobs
//! - **Jobs**: Priority queue with delayed jobs, pause/resume and dead-lettering,
//!   backed by Redis or memory, and a worker runtime with retries
//! - **Telemetry**: Structured logging with redaction and Prometheus metrics
//! - **Config**: Layered file + `SETTLE__*` environment configuration

pub mod config;
pub mod error;
pub mod jobs;
pub mod reconciliation;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SettleError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, Result, SettleError};
    pub use crate::jobs::{
        JobHandle, JobHandler, JobPriority, JobQueue, JobWorker, QueueBackend, WorkerConfig,
    };
    pub use crate::reconciliation::{
        DispatchOptions, QueueDispatcher, ReconciliationDispatcher, ReconciliationJobRequest,
        ReconciliationScheduler, ReconciliationType, SchedulerStatus,
    };
}
