//! Job definitions.
//!
//! This module provides the core abstractions for queued background work:
//!
//! - **JobId / JobHandle**: Identity of an enqueued job
//! - **JobStatus**: Enumeration of possible job states
//! - **JobPriority**: Queue priority hint
//! - **RetryPolicy**: Configuration for retry behavior with backoff strategies
//! - **JobMetadata**: Bookkeeping carried with every queued job

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, SettleError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is eligible and waiting in the queue
    Pending,
    /// Job is waiting for its delay to elapse
    Delayed,
    /// Job is currently being executed
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed and may be retried
    Failed,
    /// Job failed after all retry attempts
    Dead,
    /// Job was cancelled
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delayed => write!(f, "delayed"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Dead => write!(f, "dead"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority level for jobs. A scheduling hint, not a strict ordering guarantee
/// across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Backstop sweeps
    Low = 0,
    /// Routine scheduled work
    Medium = 1,
    /// Operator-requested work
    High = 2,
    /// Suspected payment inconsistency
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl JobPriority {
    /// All priorities, highest first.
    pub const ALL: [JobPriority; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Numeric queue hint; lower numbers are served first.
    pub fn queue_rank(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }

    /// Stable lowercase name used in queue keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<SettleError> for JobError {
    fn from(error: SettleError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

impl From<JobError> for SettleError {
    fn from(error: JobError) -> Self {
        SettleError::new(ErrorCode::JobFailed, error.message.clone())
            .with_context("retryable", error.retryable)
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        delay_secs: u64,
    },
    /// Linear increase in delay (delay * attempt)
    Linear {
        initial_delay_secs: u64,
        increment_secs: u64,
    },
    /// Exponential increase in delay (initial * 2^attempt)
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
    /// Exponential with random jitter
    ExponentialWithJitter {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 5,
            max_delay_secs: 3600,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = match self {
            Self::Fixed { delay_secs } => *delay_secs,
            Self::Linear {
                initial_delay_secs,
                increment_secs,
            } => initial_delay_secs + (increment_secs * attempt as u64),
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_secs as f64) as u64
            }
            Self::ExponentialWithJitter {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
                jitter_factor,
            } => {
                let base_delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                let capped_delay = base_delay.min(*max_delay_secs as f64);
                // delay * (1 +/- jitter_factor * random)
                let jitter_range = capped_delay * jitter_factor;
                let jitter = (rand::rng().random::<f64>() * 2.0 - 1.0) * jitter_range;
                (capped_delay + jitter).max(1.0) as u64
            }
        };

        Duration::from_secs(secs)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay_secs: u64) -> Self {
        Self::Fixed { delay_secs }
    }

    /// Create an exponential backoff strategy with sensible defaults.
    pub fn exponential() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for job retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of execution attempts, including the first
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Whether to retry on any error or only retryable errors
    pub retry_on_any_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            retry_on_any_error: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with a specific number of attempts.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Check if another attempt should be made after `attempts` have run.
    pub fn should_retry(&self, attempts: u32, error: &JobError) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }

        self.retry_on_any_error || error.retryable
    }

    /// Get the delay before the next attempt, given how many attempts have run.
    pub fn next_retry_delay(&self, attempts: u32) -> Duration {
        self.backoff.delay_for_attempt(attempts.saturating_sub(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Metadata associated with a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Unique job identifier
    pub id: JobId,
    /// Job type name
    pub job_type: String,
    /// Current status
    pub status: JobStatus,
    /// Priority level
    pub priority: JobPriority,
    /// Number of execution attempts
    pub attempts: u32,
    /// Maximum attempts allowed
    pub max_attempts: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job becomes eligible to run
    pub eligible_at: DateTime<Utc>,
    /// When the job started executing
    pub started_at: Option<DateTime<Utc>>,
    /// When the job finished (success or failure)
    pub finished_at: Option<DateTime<Utc>>,
    /// Last error message (if failed)
    pub last_error: Option<String>,
    /// Custom tags for filtering
    pub tags: Vec<String>,
}

impl JobMetadata {
    /// Create new metadata for a job that is eligible immediately.
    pub fn new(job_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            priority: JobPriority::default(),
            attempts: 0,
            max_attempts: 3,
            created_at: now,
            eligible_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            tags: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay eligibility relative to creation time.
    pub fn delayed_by(mut self, delay: Duration) -> Self {
        if !delay.is_zero() {
            self.eligible_at =
                self.created_at + chrono::Duration::from_std(delay).unwrap_or_default();
            self.status = JobStatus::Delayed;
        }
        self
    }

    /// Set the maximum attempts.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether the job may run at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.eligible_at <= now
    }

    /// Mark as running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Mark as completed.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark as failed and schedule the next attempt after `retry_in`.
    pub fn mark_failed(&mut self, error: &str, retry_in: Duration) {
        self.status = JobStatus::Delayed;
        self.last_error = Some(error.to_string());
        self.eligible_at = Utc::now() + chrono::Duration::from_std(retry_in).unwrap_or_default();
    }

    /// Mark as dead (no more retries).
    pub fn mark_dead(&mut self, error: &str) {
        self.status = JobStatus::Dead;
        self.finished_at = Some(Utc::now());
        self.last_error = Some(error.to_string());
    }

    /// Get the duration if completed.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Handle describing this job to the caller that enqueued it.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            job_type: self.job_type.clone(),
            priority: self.priority,
            eligible_at: self.eligible_at,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle returned from a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub id: JobId,
    pub job_type: String,
    pub priority: JobPriority,
    pub eligible_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let uuid = Uuid::new_v4();
        let id = JobId::from_uuid(uuid);
        assert_eq!(id.0, uuid);
    }

    #[test]
    fn test_job_status() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Delayed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Medium);
        assert!(JobPriority::Medium > JobPriority::Low);
        assert_eq!(JobPriority::Critical.queue_rank(), 1);
        assert_eq!(JobPriority::Low.queue_rank(), 4);
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_secs: 1,
            max_delay_secs: 100,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(100));
    }

    #[test]
    fn test_backoff_linear() {
        let backoff = BackoffStrategy::Linear {
            initial_delay_secs: 5,
            increment_secs: 3,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(11));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let backoff = BackoffStrategy::ExponentialWithJitter {
            initial_delay_secs: 10,
            max_delay_secs: 100,
            multiplier: 2.0,
            jitter_factor: 0.2,
        };
        for _ in 0..200 {
            let delay = backoff.delay_for_attempt(1).as_secs();
            assert!((16..=24).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::with_attempts(3);

        let retryable_error = JobError::retryable("gateway timeout");
        let fatal_error = JobError::fatal("malformed payload");

        assert!(policy.should_retry(1, &retryable_error));
        assert!(policy.should_retry(2, &retryable_error));
        assert!(!policy.should_retry(3, &retryable_error));
        assert!(!policy.should_retry(1, &fatal_error));
        assert!(!RetryPolicy::no_retry().should_retry(1, &retryable_error));
    }

    #[test]
    fn test_retry_delay_uses_previous_attempt_count() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential {
                initial_delay_secs: 2,
                max_delay_secs: 60,
                multiplier: 2.0,
            },
            retry_on_any_error: false,
        };
        assert_eq!(policy.next_retry_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_retry_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_job_metadata_delay() {
        let metadata = JobMetadata::new("payment-reconciliation")
            .with_priority(JobPriority::Low)
            .delayed_by(Duration::from_secs(600));

        assert_eq!(metadata.status, JobStatus::Delayed);
        assert!(!metadata.is_eligible(metadata.created_at));
        assert!(metadata.is_eligible(metadata.created_at + chrono::Duration::seconds(600)));

        let immediate = JobMetadata::new("payment-reconciliation").delayed_by(Duration::ZERO);
        assert_eq!(immediate.status, JobStatus::Pending);
        assert!(immediate.is_eligible(immediate.created_at));
    }

    #[test]
    fn test_job_metadata_lifecycle() {
        let mut metadata = JobMetadata::new("payment-reconciliation")
            .with_priority(JobPriority::High)
            .with_max_attempts(5)
            .with_tag("manual");

        assert_eq!(metadata.max_attempts, 5);
        assert!(metadata.tags.contains(&"manual".to_string()));

        metadata.mark_running();
        assert_eq!(metadata.status, JobStatus::Running);
        assert_eq!(metadata.attempts, 1);

        metadata.mark_failed("gateway timeout", Duration::from_secs(30));
        assert_eq!(metadata.status, JobStatus::Delayed);
        assert_eq!(metadata.last_error.as_deref(), Some("gateway timeout"));

        metadata.mark_running();
        metadata.mark_completed();
        assert_eq!(metadata.status, JobStatus::Completed);
        assert_eq!(metadata.attempts, 2);
        assert!(metadata.duration().is_some());
    }

    #[test]
    fn test_job_error_conversion() {
        let error: JobError = SettleError::queue_full(10).into();
        assert!(error.retryable);
        assert_eq!(error.code.as_deref(), Some("QueueFull"));
    }
}
