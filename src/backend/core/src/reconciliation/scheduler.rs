//! Recurring reconciliation timers plus manual and emergency triggers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::clock::{Clock, SystemClock};
use super::dispatch::{DispatchOptions, ReconciliationDispatcher};
use super::jitter::{JitterSource, ThreadRngJitter};
use super::request::{ReconciliationJobRequest, ReconciliationType};
use super::schedule::{Cadence, CadenceKind};
use crate::config::ReconciliationConfig;
use crate::error::{ErrorCode, ErrorContext, Result, SettleError};
use crate::jobs::{JobHandle, JobPriority};
use crate::telemetry::ReconciliationMetrics;

/// Batch size of operator-triggered runs.
pub const MANUAL_BATCH_SIZE: u32 = 50;
/// Look-back window of an emergency sweep.
pub const EMERGENCY_WINDOW_HOURS: u32 = 72;
pub const EMERGENCY_BATCH_SIZE: u32 = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the scheduler for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub total_jobs: usize,
    pub jobs: Vec<ScheduledJobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJobStatus {
    pub index: usize,
    pub cadence: String,
    pub running: bool,
}

struct ScheduledTask {
    kind: CadenceKind,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerRunState {
    is_running: bool,
    scheduled_tasks: Vec<ScheduledTask>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

/// Owns the recurring reconciliation timers.
///
/// Each cadence runs as its own tokio task that sleeps until the next cron
/// occurrence and enqueues one job. Occurrences missed while a dispatch was in
/// flight are skipped, never replayed. Dispatch failures inside a timer are
/// logged and the timer keeps going.
pub struct ReconciliationScheduler {
    dispatcher: Arc<dyn ReconciliationDispatcher>,
    config: ReconciliationConfig,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    state: Mutex<SchedulerRunState>,
}

impl ReconciliationScheduler {
    /// Scheduler with the default cadences in `Africa/Lagos`.
    pub fn new(dispatcher: Arc<dyn ReconciliationDispatcher>) -> Self {
        Self::from_config(dispatcher, ReconciliationConfig::default())
    }

    pub fn from_config(
        dispatcher: Arc<dyn ReconciliationDispatcher>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            dispatcher,
            config,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(ThreadRngJitter),
            state: Mutex::new(SchedulerRunState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the recurring cadences on the current tokio runtime.
    ///
    /// Does not run a reconciliation immediately. Calling it while running is a
    /// logged no-op.
    ///
    /// # Errors
    ///
    /// `SchedulerUnavailable` outside a tokio runtime; a bad cron rule or
    /// timezone, or a rule with no future occurrence. The scheduler is left
    /// stopped with no timers.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_running {
            tracing::warn!("Reconciliation scheduler is already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().with_error_code(
            ErrorCode::SchedulerUnavailable,
            "Reconciliation scheduler must be started inside a Tokio runtime",
        )?;

        let now = self.clock.now();
        let mut planned = Vec::with_capacity(CadenceKind::ALL.len());
        for cadence in Cadence::resolve_all(&self.config)? {
            let first = cadence
                .rule
                .next_after(now)
                .ok_or_else(|| SettleError::schedule_exhausted(cadence.kind.name()))?;
            planned.push((cadence, first));
        }

        for (cadence, first) in planned {
            let kind = cadence.kind;
            tracing::info!(
                cadence = %kind,
                rule = %cadence.rule,
                first_run = %first.with_timezone(&cadence.rule.timezone()),
                "Registered reconciliation cadence"
            );

            let timer = CadenceTimer {
                cadence,
                dispatcher: Arc::clone(&self.dispatcher),
                clock: Arc::clone(&self.clock),
                jitter: Arc::clone(&self.jitter),
            };
            let handle = runtime.spawn(timer.run(first));
            state.scheduled_tasks.push(ScheduledTask { kind, handle });
        }

        state.is_running = true;
        tracing::info!(
            timezone = %self.config.timezone,
            cadences = state.scheduled_tasks.len(),
            "Reconciliation scheduler started"
        );
        Ok(())
    }

    /// Cancel every timer. Jobs already enqueued are untouched.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.is_running {
            tracing::warn!("Reconciliation scheduler is not running");
            return;
        }

        for task in state.scheduled_tasks.drain(..) {
            task.handle.abort();
            tracing::debug!(cadence = %task.kind, "Cancelled reconciliation cadence");
        }
        state.is_running = false;
        tracing::info!("Reconciliation scheduler stopped");
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().is_running
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock();
        SchedulerStatus {
            is_running: state.is_running,
            total_jobs: state.scheduled_tasks.len(),
            jobs: state
                .scheduled_tasks
                .iter()
                .enumerate()
                .map(|(index, task)| ScheduledJobStatus {
                    index,
                    cadence: task.kind.name().to_string(),
                    running: !task.handle.is_finished(),
                })
                .collect(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // On-demand triggers
    // ─────────────────────────────────────────────────────────────────────────

    /// Enqueue an operator-requested reconciliation with no delay.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a zero window, otherwise whatever the dispatcher
    /// returns.
    pub async fn trigger_manual_reconciliation(
        &self,
        time_range_hours: u32,
        only_unconfirmed: bool,
    ) -> Result<JobHandle> {
        let request = ReconciliationJobRequest::new(
            ReconciliationType::Manual,
            time_range_hours,
            MANUAL_BATCH_SIZE,
            only_unconfirmed,
            JobPriority::High,
            0,
        )?;

        let handle = self.dispatch_now("manual", &request).await?;
        tracing::info!(
            job_id = %handle.id,
            time_range_hours,
            only_unconfirmed,
            "Manual reconciliation triggered"
        );
        Ok(handle)
    }

    /// Enqueue a critical sweep of the last 72 hours of unconfirmed orders.
    pub async fn trigger_emergency_reconciliation(&self) -> Result<JobHandle> {
        let request = ReconciliationJobRequest::new(
            ReconciliationType::Emergency,
            EMERGENCY_WINDOW_HOURS,
            EMERGENCY_BATCH_SIZE,
            true,
            JobPriority::Critical,
            0,
        )?;

        let handle = self.dispatch_now("emergency", &request).await?;
        tracing::warn!(job_id = %handle.id, "Emergency reconciliation triggered");
        Ok(handle)
    }

    async fn dispatch_now(
        &self,
        trigger: &str,
        request: &ReconciliationJobRequest,
    ) -> Result<JobHandle> {
        let started = Instant::now();
        let kind = request.reconciliation_type().as_str();

        match self
            .dispatcher
            .add_payment_reconciliation_job(request, DispatchOptions::immediate())
            .await
        {
            Ok(handle) => {
                ReconciliationMetrics::record_dispatched(
                    trigger,
                    kind,
                    started.elapsed().as_secs_f64(),
                );
                Ok(handle)
            }
            Err(error) => {
                ReconciliationMetrics::record_dispatch_failed(trigger, kind);
                tracing::error!(
                    trigger,
                    reconciliation_type = kind,
                    error = %error,
                    "Failed to enqueue reconciliation"
                );
                Err(error)
            }
        }
    }
}

impl Drop for ReconciliationScheduler {
    fn drop(&mut self) {
        for task in self.state.get_mut().scheduled_tasks.drain(..) {
            task.handle.abort();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cadence Timer
// ═══════════════════════════════════════════════════════════════════════════════

struct CadenceTimer {
    cadence: Cadence,
    dispatcher: Arc<dyn ReconciliationDispatcher>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
}

impl CadenceTimer {
    async fn run(self, first: DateTime<Utc>) {
        let name = self.cadence.kind.name();
        let tz = self.cadence.rule.timezone();
        let mut next = first;

        loop {
            tracing::debug!(
                cadence = name,
                next_run = %next.with_timezone(&tz),
                "Waiting for next reconciliation"
            );
            self.sleep_until(next).await;
            self.fire().await;

            let now = self.clock.now();
            let after = if now > next { now } else { next };
            match self.cadence.rule.next_after(after) {
                Some(upcoming) => next = upcoming,
                None => {
                    tracing::warn!(cadence = name, "Cron rule has no further occurrences");
                    return;
                }
            }
        }
    }

    async fn sleep_until(&self, target: DateTime<Utc>) {
        loop {
            let remaining = target - self.clock.now();
            match remaining.to_std() {
                Ok(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                _ => return,
            }
        }
    }

    /// Enqueue one scheduled job. Errors are logged and swallowed.
    async fn fire(&self) {
        let kind = self.cadence.kind;
        let delay_ms = self.jitter.sample_ms(kind.jitter());

        let request = match kind.request(delay_ms) {
            Ok(request) => request,
            Err(error) => {
                error.log();
                return;
            }
        };
        let reconciliation_type = request.reconciliation_type().as_str();

        let started = Instant::now();
        match self
            .dispatcher
            .add_payment_reconciliation_job(&request, DispatchOptions::delayed(request.delay()))
            .await
        {
            Ok(handle) => {
                ReconciliationMetrics::record_dispatched(
                    kind.name(),
                    reconciliation_type,
                    started.elapsed().as_secs_f64(),
                );
                tracing::info!(
                    cadence = %kind,
                    job_id = %handle.id,
                    time_range_hours = request.time_range_hours(),
                    batch_size = request.batch_size(),
                    only_unconfirmed = request.only_unconfirmed(),
                    delay = ?Duration::from_millis(delay_ms),
                    "Scheduled reconciliation enqueued"
                );
            }
            Err(error) => {
                ReconciliationMetrics::record_dispatch_failed(kind.name(), reconciliation_type);
                tracing::error!(
                    cadence = %kind,
                    reconciliation_type,
                    error = %error,
                    "Failed to enqueue scheduled reconciliation"
                );
            }
        }
    }
}
