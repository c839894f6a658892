//! Payment reconciliation scheduling.
//!
//! Local order and payment state drifts from the gateway's view (webhooks get
//! lost, customers abandon checkout mid-redirect). This module decides *when*
//! to reconcile and *with what parameters*, and hands each run to the job
//! queue as a `payment-reconciliation` job:
//!
//! | Cadence | Rule (Africa/Lagos) | Window | Batch | Orders | Priority |
//! |---|---|---|---|---|---|
//! | frequent | every 15 min | 4h | 30 | unconfirmed | medium |
//! | regular | every 6 h | 24h | 100 | all | medium |
//! | comprehensive | daily 02:00 | 7d | 200 | all | low |
//!
//! Operators can also trigger a manual run (high priority) or an emergency
//! sweep (critical priority, last 72 hours of unconfirmed orders).
//!
//! Windows of different cadences overlap and are never deduplicated, so the
//! handler that performs the comparison must be idempotent per order.

mod clock;
mod dispatch;
mod jitter;
mod request;
mod schedule;
mod scheduler;

pub use clock::{Clock, SystemClock};
pub use dispatch::{
    DispatchOptions, QueueDispatcher, ReconciliationDispatcher, PAYMENT_RECONCILIATION_JOB,
};
pub use jitter::{JitterRange, JitterSource, ThreadRngJitter};
pub use request::{ReconciliationJobRequest, ReconciliationType};
pub use schedule::{Cadence, CadenceKind, CronRule};
pub use scheduler::{
    ReconciliationScheduler, ScheduledJobStatus, SchedulerStatus, EMERGENCY_BATCH_SIZE,
    EMERGENCY_WINDOW_HOURS, MANUAL_BATCH_SIZE,
};
