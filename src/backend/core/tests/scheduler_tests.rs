//! Tests for the reconciliation scheduler.
//!
//! Tests cover:
//! - Start/stop lifecycle and status reporting
//! - Manual and emergency triggers
//! - Failure isolation inside fired cadences
//! - Jitter bounds per cadence
//! - End-to-end firing with paused tokio time
//! - Overlapping cadence windows left undeduplicated

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use settle_core::error::{ErrorCode, Result, SettleError};
use settle_core::jobs::{JobHandle, JobId, JobPriority};
use settle_core::reconciliation::{
    CadenceKind, Clock, DispatchOptions, JitterRange, JitterSource, ReconciliationDispatcher,
    ReconciliationJobRequest, ReconciliationScheduler, ReconciliationType, ThreadRngJitter,
    EMERGENCY_BATCH_SIZE, EMERGENCY_WINDOW_HOURS, MANUAL_BATCH_SIZE, PAYMENT_RECONCILIATION_JOB,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(ReconciliationJobRequest, DispatchOptions)>>,
    fail: bool,
}

impl RecordingDispatcher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(ReconciliationJobRequest, DispatchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReconciliationDispatcher for RecordingDispatcher {
    async fn add_payment_reconciliation_job(
        &self,
        request: &ReconciliationJobRequest,
        options: DispatchOptions,
    ) -> Result<JobHandle> {
        self.calls.lock().unwrap().push((request.clone(), options));
        if self.fail {
            return Err(SettleError::new(
                ErrorCode::QueueConnectionFailed,
                "Unable to connect to the job queue",
            ));
        }
        Ok(JobHandle {
            id: JobId::new(),
            job_type: PAYMENT_RECONCILIATION_JOB.to_string(),
            priority: request.priority(),
            eligible_at: Utc::now(),
        })
    }
}

/// Wall clock that moves with tokio's (pausable) clock.
struct TokioClock {
    base_wall: DateTime<Utc>,
    base_instant: tokio::time::Instant,
}

impl TokioClock {
    fn anchored_at(base_wall: DateTime<Utc>) -> Self {
        Self {
            base_wall,
            base_instant: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.base_instant;
        self.base_wall + chrono::Duration::from_std(elapsed).unwrap()
    }
}

struct MinJitter;

impl JitterSource for MinJitter {
    fn sample_ms(&self, range: JitterRange) -> u64 {
        range.min_ms
    }
}

struct MaxJitter;

impl JitterSource for MaxJitter {
    fn sample_ms(&self, range: JitterRange) -> u64 {
        range.max_ms
    }
}

/// Monday 2026-01-05 09:05 in Lagos.
fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 8, 5, 0).unwrap()
}

fn scheduler_with(dispatcher: Arc<RecordingDispatcher>) -> ReconciliationScheduler {
    ReconciliationScheduler::new(dispatcher)
        .with_clock(Arc::new(TokioClock::anchored_at(monday_morning())))
}

async fn let_timers_run() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    let_timers_run().await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_start_registers_three_cadences() {
    let scheduler = ReconciliationScheduler::new(Arc::new(RecordingDispatcher::default()));

    scheduler.start().unwrap();

    assert!(scheduler.is_active());
    let status = scheduler.status();
    assert!(status.is_running);
    assert_eq!(status.total_jobs, 3);
    assert_eq!(status.jobs.len(), 3);
    assert!(status.jobs.iter().all(|job| job.running));
}

#[tokio::test]
async fn test_start_does_not_reconcile_immediately() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    scheduler.start().unwrap();
    let_timers_run().await;

    assert_eq!(dispatcher.count(), 0);
}

#[tokio::test]
async fn test_double_start_is_noop() {
    let scheduler = ReconciliationScheduler::new(Arc::new(RecordingDispatcher::default()));

    scheduler.start().unwrap();
    scheduler.start().unwrap();

    assert!(scheduler.is_active());
    assert_eq!(scheduler.status().total_jobs, 3);
}

#[tokio::test]
async fn test_stop_when_not_running_is_noop() {
    let scheduler = ReconciliationScheduler::new(Arc::new(RecordingDispatcher::default()));

    scheduler.stop();

    assert!(!scheduler.is_active());
    assert_eq!(scheduler.status().total_jobs, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_timers_and_silences_cadences() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = scheduler_with(dispatcher.clone());

    scheduler.start().unwrap();
    scheduler.stop();

    let status = scheduler.status();
    assert!(!status.is_running);
    assert_eq!(status.total_jobs, 0);
    assert!(status.jobs.is_empty());

    advance(Duration::from_secs(24 * 3600)).await;
    assert_eq!(dispatcher.count(), 0);
}

#[test]
fn test_start_outside_runtime_fails_without_panicking() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    let err = scheduler.start().unwrap_err();

    assert_eq!(err.code(), ErrorCode::SchedulerUnavailable);
    assert!(!scheduler.is_active());
    assert_eq!(scheduler.status().total_jobs, 0);
    assert_eq!(dispatcher.count(), 0);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let scheduler = ReconciliationScheduler::new(Arc::new(RecordingDispatcher::default()));

    scheduler.start().unwrap();
    scheduler.stop();
    scheduler.start().unwrap();

    assert!(scheduler.is_active());
    assert_eq!(scheduler.status().total_jobs, 3);
}

// ============================================================================
// Trigger Tests
// ============================================================================

#[tokio::test]
async fn test_manual_trigger_parameters() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    let handle = scheduler.trigger_manual_reconciliation(24, false).await.unwrap();
    assert_eq!(handle.priority, JobPriority::High);

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    let (request, options) = &calls[0];
    assert_eq!(request.reconciliation_type(), ReconciliationType::Manual);
    assert_eq!(request.time_range_hours(), 24);
    assert_eq!(request.batch_size(), 50);
    assert_eq!(request.batch_size(), MANUAL_BATCH_SIZE);
    assert!(!request.only_unconfirmed());
    assert_eq!(request.priority(), JobPriority::High);
    assert_eq!(request.delay_ms(), 0);
    assert_eq!(options.delay, Duration::ZERO);
}

#[tokio::test]
async fn test_emergency_trigger_parameters() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    let handle = scheduler.trigger_emergency_reconciliation().await.unwrap();
    assert_eq!(handle.priority, JobPriority::Critical);

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    let (request, options) = &calls[0];
    assert_eq!(request.reconciliation_type(), ReconciliationType::Emergency);
    assert_eq!(request.time_range_hours(), 72);
    assert_eq!(request.time_range_hours(), EMERGENCY_WINDOW_HOURS);
    assert_eq!(request.batch_size(), 20);
    assert_eq!(request.batch_size(), EMERGENCY_BATCH_SIZE);
    assert!(request.only_unconfirmed());
    assert_eq!(request.priority(), JobPriority::Critical);
    assert_eq!(request.delay_ms(), 0);
    assert_eq!(options.delay, Duration::ZERO);
}

#[tokio::test]
async fn test_triggers_work_without_start() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    scheduler.trigger_manual_reconciliation(4, true).await.unwrap();

    assert!(!scheduler.is_active());
    assert_eq!(dispatcher.count(), 1);
}

#[tokio::test]
async fn test_manual_trigger_propagates_dispatch_error() {
    let dispatcher = Arc::new(RecordingDispatcher::failing());
    let scheduler = ReconciliationScheduler::new(dispatcher.clone());

    let err = scheduler
        .trigger_manual_reconciliation(24, false)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::QueueConnectionFailed);
    assert_eq!(dispatcher.count(), 1);
}

#[tokio::test]
async fn test_emergency_trigger_propagates_dispatch_error() {
    let scheduler = ReconciliationScheduler::new(Arc::new(RecordingDispatcher::failing()));

    let err = scheduler.trigger_emergency_reconciliation().await.unwrap_err();
    assert!(err.is_retryable());
}

// ============================================================================
// Failure Isolation Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_dispatch_keeps_cadence_alive() {
    let dispatcher = Arc::new(RecordingDispatcher::failing());
    let scheduler = scheduler_with(dispatcher.clone());
    scheduler.start().unwrap();

    // 08:05 -> 08:20 UTC: the 08:15 frequent slot fires and fails
    advance(Duration::from_secs(15 * 60)).await;
    assert_eq!(dispatcher.count(), 1);
    assert!(scheduler.is_active());
    assert!(scheduler.status().jobs.iter().all(|job| job.running));

    // the 08:30 slot fires again despite the earlier failure
    advance(Duration::from_secs(15 * 60)).await;
    assert_eq!(dispatcher.count(), 2);
    let calls = dispatcher.calls();
    assert!(calls.iter().all(|(request, _)| request.time_range_hours() == 4));
    assert!(scheduler.is_active());
}

// ============================================================================
// Jitter Tests
// ============================================================================

fn expected_jitter(time_range_hours: u32) -> JitterRange {
    match time_range_hours {
        4 => JitterRange::new(60_000, 300_000),
        24 => JitterRange::new(300_000, 900_000),
        168 => JitterRange::new(600_000, 1_800_000),
        other => panic!("unexpected window {}", other),
    }
}

#[test]
fn test_cadence_jitter_ranges() {
    assert_eq!(CadenceKind::Frequent.jitter(), JitterRange::new(60_000, 300_000));
    assert_eq!(CadenceKind::Regular.jitter(), JitterRange::new(300_000, 900_000));
    assert_eq!(
        CadenceKind::Comprehensive.jitter(),
        JitterRange::new(600_000, 1_800_000)
    );
}

#[test]
fn test_thread_rng_jitter_within_cadence_bounds() {
    for kind in CadenceKind::ALL {
        let range = kind.jitter();
        for _ in 0..500 {
            let delay = ThreadRngJitter.sample_ms(range);
            assert!(range.contains(delay), "{} delay {} out of range", kind, delay);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_min_jitter_applied_per_cadence() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = scheduler_with(dispatcher.clone()).with_jitter(Arc::new(MinJitter));
    scheduler.start().unwrap();

    // one advance past every cadence's first slot fires each exactly once
    advance(Duration::from_secs(24 * 3600)).await;

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 3);
    for (request, options) in calls {
        let expected = expected_jitter(request.time_range_hours()).min_ms;
        assert_eq!(request.delay_ms(), expected);
        assert_eq!(options.delay, Duration::from_millis(expected));
    }
}

#[tokio::test(start_paused = true)]
async fn test_max_jitter_applied_per_cadence() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = scheduler_with(dispatcher.clone()).with_jitter(Arc::new(MaxJitter));
    scheduler.start().unwrap();

    advance(Duration::from_secs(24 * 3600)).await;

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 3);
    let mut windows: Vec<_> = calls.iter().map(|(r, _)| r.time_range_hours()).collect();
    windows.sort_unstable();
    assert_eq!(windows, vec![4, 24, 168]);
    for (request, options) in calls {
        let expected = expected_jitter(request.time_range_hours()).max_ms;
        assert_eq!(request.delay_ms(), expected);
        assert_eq!(options.delay, Duration::from_millis(expected));
    }
}

// ============================================================================
// End-to-End Timing Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cadences_fire_on_wall_clock_schedule() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = scheduler_with(dispatcher.clone());
    scheduler.start().unwrap();

    // 09:05 -> 09:20 Lagos: only the 09:15 frequent slot
    advance(Duration::from_secs(15 * 60)).await;
    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    let (frequent, _) = &calls[0];
    assert_eq!(frequent.reconciliation_type(), ReconciliationType::Scheduled);
    assert_eq!(frequent.time_range_hours(), 4);
    assert_eq!(frequent.batch_size(), 30);
    assert!(frequent.only_unconfirmed());
    assert_eq!(frequent.priority(), JobPriority::Medium);

    // 09:20 -> 15:20 Lagos: crosses the 12:00 six-hourly slot
    advance(Duration::from_secs(6 * 3600)).await;
    let calls = dispatcher.calls();
    let regular: Vec<_> = calls
        .iter()
        .filter(|(request, _)| request.time_range_hours() == 24)
        .collect();
    assert_eq!(regular.len(), 1);
    let (request, options) = regular[0];
    assert_eq!(request.batch_size(), 100);
    assert!(!request.only_unconfirmed());
    assert_eq!(request.priority(), JobPriority::Medium);
    assert!(CadenceKind::Regular.jitter().contains(request.delay_ms()));
    assert_eq!(options.delay, request.delay());

    // nightly sweep is not due until 02:00
    assert!(calls.iter().all(|(request, _)| request.time_range_hours() != 168));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_cadences_are_not_deduplicated() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let scheduler = scheduler_with(dispatcher.clone());
    scheduler.start().unwrap();

    // 09:05 -> 11:55 Lagos
    advance(Duration::from_secs(2 * 3600 + 50 * 60)).await;
    let before = dispatcher.count();
    assert!(dispatcher
        .calls()
        .iter()
        .all(|(request, _)| request.time_range_hours() == 4));

    // 11:55 -> 12:01 Lagos: frequent and six-hourly slots coincide at 12:00
    advance(Duration::from_secs(6 * 60)).await;
    let calls = dispatcher.calls();
    assert_eq!(calls.len(), before + 2);

    let mut windows: Vec<_> = calls[before..]
        .iter()
        .map(|(request, _)| request.time_range_hours())
        .collect();
    windows.sort_unstable();
    assert_eq!(windows, vec![4, 24]);
}
