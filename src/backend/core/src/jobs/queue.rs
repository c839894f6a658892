//! Job queue with priority, delayed eligibility, pause/resume and dead letter handling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::{JobMetadata, JobPriority, JobStatus};
use crate::error::{Result, SettleError};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of waiting and delayed jobs (0 = unlimited)
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Whether to enable the dead letter queue
    #[serde(default = "default_enable_dead_letter")]
    pub enable_dead_letter: bool,
    /// Maximum items in the dead letter queue
    #[serde(default = "default_dead_letter_max_size")]
    pub dead_letter_max_size: usize,
    /// Attempts allowed per job, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_size() -> usize {
    10_000
}

fn default_enable_dead_letter() -> bool {
    true
}

fn default_dead_letter_max_size() -> usize {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            enable_dead_letter: default_enable_dead_letter(),
            dead_letter_max_size: default_dead_letter_max_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queued Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A job in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Job metadata
    pub metadata: JobMetadata,
    /// Serialized job payload
    pub data: serde_json::Value,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Set by the backend that delivered the job; consumed by `JobQueue::ack`
    #[serde(skip)]
    receipt: Option<String>,
}

impl QueuedJob {
    /// Wrap metadata and payload, stamping the enqueue time.
    pub fn new(metadata: JobMetadata, data: serde_json::Value) -> Self {
        Self {
            metadata,
            data,
            enqueued_at: Utc::now(),
            receipt: None,
        }
    }

    /// Delivery receipt, present on jobs handed out by `dequeue`.
    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    pub(crate) fn take_receipt(&mut self) -> Option<String> {
        self.receipt.take()
    }

    fn is_delayed(&self) -> bool {
        self.metadata.status == JobStatus::Delayed
    }

    fn promote(&mut self) {
        self.metadata.status = JobStatus::Pending;
    }
}

/// Heap entry ordered by priority, then by arrival within a priority.
#[derive(Debug)]
struct ReadyEntry {
    job: QueuedJob,
    sequence: u64,
}

impl Eq for ReadyEntry {}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .metadata
            .priority
            .cmp(&other.job.metadata.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs eligible to run now
    pub pending: usize,
    /// Jobs waiting for their delay to elapse
    pub delayed: usize,
    /// Jobs handed to a worker and not yet acknowledged
    pub active: usize,
    /// Jobs completed by workers of this process
    pub completed: u64,
    /// Failed attempts seen by workers of this process
    pub failed: u64,
    /// Jobs in the dead letter queue
    pub dead_letter: usize,
    /// Whether dequeueing is paused
    pub paused: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dead Letter Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded dead letter queue for jobs that can no longer be retried.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: VecDeque<QueuedJob>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_size,
        }
    }

    /// Push a job, evicting the oldest when full.
    pub fn push(&mut self, job: QueuedJob) {
        if self.max_size == 0 {
            return;
        }
        if self.jobs.len() >= self.max_size {
            self.jobs.pop_front();
        }
        self.jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedJob> {
        self.jobs.iter().cloned().collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait for queue backends.
///
/// Backends store jobs durably (or not), hold delayed jobs until their
/// `eligible_at`, and serve the highest priority eligible job first, FIFO
/// within a priority. Pausing stops dequeueing only; enqueue keeps working.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue a job. Jobs with status `Delayed` are held until eligible.
    async fn enqueue(&self, job: QueuedJob) -> Result<()>;

    /// Dequeue the highest priority job eligible at `now`.
    ///
    /// The job stays claimed under its receipt until [`ack`](Self::ack), so a
    /// worker that dies mid-job leaves it recoverable.
    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>>;

    /// Release a delivered job once its outcome is settled.
    async fn ack(&self, receipt: &str) -> Result<()>;

    /// Put delivered but unacknowledged jobs back on their wait lists.
    ///
    /// Only safe while no worker is consuming the queue.
    async fn recover_stalled(&self) -> Result<usize>;

    /// Get queue statistics.
    async fn stats(&self) -> Result<QueueStats>;

    /// Number of waiting plus delayed jobs.
    async fn len(&self) -> Result<usize>;

    /// Stop handing out jobs.
    async fn pause(&self) -> Result<()>;

    /// Resume handing out jobs.
    async fn resume(&self) -> Result<()>;

    /// Whether dequeueing is paused.
    async fn is_paused(&self) -> Result<bool>;

    /// Check if the queue is empty.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct InMemoryState {
    ready: BinaryHeap<ReadyEntry>,
    delayed: Vec<QueuedJob>,
    active: HashMap<String, QueuedJob>,
    sequence: u64,
    deliveries: u64,
    paused: bool,
}

impl InMemoryState {
    fn push_ready(&mut self, job: QueuedJob) {
        self.sequence += 1;
        self.ready.push(ReadyEntry {
            job,
            sequence: self.sequence,
        });
    }

    fn promote_eligible(&mut self, now: DateTime<Utc>) {
        let (mut eligible, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|job| job.metadata.is_eligible(now));
        self.delayed = waiting;

        eligible.sort_by_key(|job| job.metadata.eligible_at);
        for mut job in eligible {
            job.promote();
            self.push_ready(job);
        }
    }
}

/// In-memory queue backend for tests, the CLI dry runs and development.
#[derive(Default)]
pub struct InMemoryQueueBackend {
    state: Mutex<InMemoryState>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        let mut state = self.state.lock();
        if job.is_delayed() {
            state.delayed.push(job);
        } else {
            state.push_ready(job);
        }
        Ok(())
    }

    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let mut state = self.state.lock();
        if state.paused {
            return Ok(None);
        }
        state.promote_eligible(now);

        let Some(entry) = state.ready.pop() else {
            return Ok(None);
        };
        state.deliveries += 1;
        let receipt = format!("{}:{}", entry.job.metadata.id, state.deliveries);
        state.active.insert(receipt.clone(), entry.job.clone());

        let mut job = entry.job;
        job.receipt = Some(receipt);
        Ok(Some(job))
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        self.state.lock().active.remove(receipt);
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut stalled: Vec<QueuedJob> = state.active.drain().map(|(_, job)| job).collect();
        stalled.sort_by_key(|job| job.enqueued_at);

        let recovered = stalled.len();
        for job in stalled {
            state.push_ready(job);
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats {
            pending: state.ready.len(),
            delayed: state.delayed.len(),
            active: state.active.len(),
            paused: state.paused,
            ..QueueStats::default()
        })
    }

    async fn len(&self) -> Result<usize> {
        let state = self.state.lock();
        Ok(state.ready.len() + state.delayed.len())
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().paused)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Default key prefix for Redis queue keys.
pub const DEFAULT_QUEUE_PREFIX: &str = "settle:queue";

/// Delayed jobs promoted per dequeue call.
const PROMOTE_BATCH: usize = 100;

/// Wait lists in the order the Lua scripts address them (`KEYS[3..6]`).
const ROUTED_PRIORITIES: [JobPriority; 4] = [
    JobPriority::Low,
    JobPriority::Medium,
    JobPriority::High,
    JobPriority::Critical,
];

/// Moves due members of the delayed set onto their wait lists in one step.
/// Members that cannot be decoded go to the dead list.
///
/// KEYS: delayed, dead, wait:low, wait:medium, wait:high, wait:critical
/// ARGV: now (ms), batch size
const PROMOTE_SCRIPT: &str = r#"
local routes = {low = 3, medium = 4, high = 5, critical = 6}
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local promoted = 0
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
    local ok, job = pcall(cjson.decode, member)
    local route = ok and type(job) == 'table' and type(job.metadata) == 'table'
        and routes[job.metadata.priority]
    if route then
        redis.call('RPUSH', KEYS[route], member)
        promoted = promoted + 1
    else
        redis.call('RPUSH', KEYS[2], member)
    end
end
return promoted
"#;

/// Returns every member of the active list to the front of its wait list.
///
/// KEYS: active, dead, wait:low, wait:medium, wait:high, wait:critical
const RECOVER_SCRIPT: &str = r#"
local routes = {low = 3, medium = 4, high = 5, critical = 6}
local stalled = redis.call('LRANGE', KEYS[1], 0, -1)
redis.call('DEL', KEYS[1])
local recovered = 0
for i = #stalled, 1, -1 do
    local member = stalled[i]
    local ok, job = pcall(cjson.decode, member)
    local route = ok and type(job) == 'table' and type(job.metadata) == 'table'
        and routes[job.metadata.priority]
    if route then
        redis.call('LPUSH', KEYS[route], member)
        recovered = recovered + 1
    else
        redis.call('RPUSH', KEYS[2], member)
    end
end
return recovered
"#;

/// Redis-backed queue backend for production use.
///
/// Layout under the prefix:
/// - `{prefix}:wait:{priority}`: one list per priority, FIFO
/// - `{prefix}:delayed`: sorted set of serialized jobs scored by eligibility (ms)
/// - `{prefix}:active`: jobs delivered to a worker and not yet acknowledged
/// - `{prefix}:dead`: raw members that could not be decoded
/// - `{prefix}:paused`: present while the queue is paused
///
/// Delivery is at least once: `dequeue` moves a job from its wait list to the
/// active list with `LMOVE`, and the worker removes it with `ack` after the
/// outcome is recorded. Promotion of delayed jobs runs as a Lua script so a
/// job is always in exactly one of the keys.
pub struct RedisQueueBackend {
    client: redis::Client,
    prefix: String,
    promote_script: redis::Script,
    recover_script: redis::Script,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    ///
    /// # Arguments
    /// * `client` - A Redis client
    /// * `prefix` - Key prefix (e.g. `"settle:queue"`)
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
            recover_script: redis::Script::new(RECOVER_SCRIPT),
        }
    }

    /// Open a client for `url` and build the backend.
    pub fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(client, prefix))
    }

    fn wait_key(&self, priority: JobPriority) -> String {
        format!("{}:wait:{}", self.prefix, priority.as_str())
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    fn paused_key(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    /// Obtain an async multiplexed connection from the Redis client.
    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn push_ready(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueuedJob,
    ) -> Result<()> {
        let serialized = serde_json::to_string(job)?;
        redis::cmd("RPUSH")
            .arg(self.wait_key(job.metadata.priority))
            .arg(&serialized)
            .query_async::<_, i64>(conn)
            .await?;
        Ok(())
    }

    /// Invoke a routing script with `source` as `KEYS[1]`.
    async fn route(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        script: &redis::Script,
        source: String,
        args: &[i64],
    ) -> Result<usize> {
        let mut invocation = script.prepare_invoke();
        invocation.key(source).key(self.dead_key());
        for priority in ROUTED_PRIORITIES {
            invocation.key(self.wait_key(priority));
        }
        for arg in args {
            invocation.arg(*arg);
        }
        Ok(invocation.invoke_async(conn).await?)
    }

    /// Move delayed jobs that became eligible onto their wait lists.
    async fn promote_eligible(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.route(
            conn,
            &self.promote_script,
            self.delayed_key(),
            &[now.timestamp_millis(), PROMOTE_BATCH as i64],
        )
        .await
    }

    /// Move an undecodable member from the active list to the dead list.
    async fn bury_raw(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        raw: &str,
        reason: &str,
    ) -> Result<()> {
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.active_key())
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("RPUSH")
            .arg(self.dead_key())
            .arg(raw)
            .ignore()
            .query_async::<_, ()>(conn)
            .await?;
        tracing::warn!(queue = %self.prefix, error = %reason, "Undecodable job moved to dead list");
        Ok(())
    }

    async fn list_len(&self, conn: &mut redis::aio::MultiplexedConnection, key: String) -> Result<usize> {
        Ok(redis::cmd("LLEN").arg(key).query_async(conn).await?)
    }

    async fn count_waiting(&self, conn: &mut redis::aio::MultiplexedConnection) -> Result<usize> {
        let mut total = 0;
        for priority in JobPriority::ALL {
            total += self.list_len(conn, self.wait_key(priority)).await?;
        }
        Ok(total)
    }

    async fn count_delayed(&self, conn: &mut redis::aio::MultiplexedConnection) -> Result<usize> {
        Ok(redis::cmd("ZCARD")
            .arg(self.delayed_key())
            .query_async(conn)
            .await?)
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    #[tracing::instrument(name = "redis_queue_enqueue", skip_all, fields(queue = %self.prefix))]
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        let mut conn = self.get_conn().await?;
        if job.is_delayed() {
            let serialized = serde_json::to_string(&job)?;
            redis::cmd("ZADD")
                .arg(self.delayed_key())
                .arg(job.metadata.eligible_at.timestamp_millis())
                .arg(&serialized)
                .query_async::<_, i64>(&mut conn)
                .await?;
        } else {
            self.push_ready(&mut conn, &job).await?;
        }

        tracing::debug!(
            queue = %self.prefix,
            job_id = %job.metadata.id,
            status = %job.metadata.status,
            "Job enqueued"
        );
        Ok(())
    }

    #[tracing::instrument(name = "redis_queue_dequeue", skip_all, fields(queue = %self.prefix))]
    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let mut conn = self.get_conn().await?;

        let paused: bool = redis::cmd("EXISTS")
            .arg(self.paused_key())
            .query_async(&mut conn)
            .await?;
        if paused {
            return Ok(None);
        }

        self.promote_eligible(&mut conn, now).await?;

        for priority in JobPriority::ALL {
            loop {
                let raw: Option<String> = redis::cmd("LMOVE")
                    .arg(self.wait_key(priority))
                    .arg(self.active_key())
                    .arg("LEFT")
                    .arg("RIGHT")
                    .query_async(&mut conn)
                    .await?;
                let Some(raw) = raw else {
                    break;
                };

                match serde_json::from_str::<QueuedJob>(&raw) {
                    Ok(mut job) => {
                        job.promote();
                        job.receipt = Some(raw);
                        tracing::debug!(queue = %self.prefix, job_id = %job.metadata.id, "Job dequeued");
                        return Ok(Some(job));
                    }
                    Err(error) => self.bury_raw(&mut conn, &raw, &error.to_string()).await?,
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("LREM")
            .arg(self.active_key())
            .arg(1)
            .arg(receipt)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "redis_queue_recover", skip_all, fields(queue = %self.prefix))]
    async fn recover_stalled(&self) -> Result<usize> {
        let mut conn = self.get_conn().await?;
        self.route(&mut conn, &self.recover_script, self.active_key(), &[])
            .await
    }

    #[tracing::instrument(name = "redis_queue_stats", skip_all, fields(queue = %self.prefix))]
    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.get_conn().await?;
        let pending = self.count_waiting(&mut conn).await?;
        let delayed = self.count_delayed(&mut conn).await?;
        let active = self.list_len(&mut conn, self.active_key()).await?;
        let dead_letter = self.list_len(&mut conn, self.dead_key()).await?;
        let paused: bool = redis::cmd("EXISTS")
            .arg(self.paused_key())
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            pending,
            delayed,
            active,
            dead_letter,
            paused,
            ..QueueStats::default()
        })
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.get_conn().await?;
        Ok(self.count_waiting(&mut conn).await? + self.count_delayed(&mut conn).await?)
    }

    async fn pause(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("SET")
            .arg(self.paused_key())
            .arg(Utc::now().to_rfc3339())
            .query_async::<_, ()>(&mut conn)
            .await?;
        tracing::info!(queue = %self.prefix, "Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("DEL")
            .arg(self.paused_key())
            .query_async::<_, i64>(&mut conn)
            .await?;
        tracing::info!(queue = %self.prefix, "Queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        Ok(redis::cmd("EXISTS")
            .arg(self.paused_key())
            .query_async(&mut conn)
            .await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// The main job queue.
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    dead_letter: Mutex<DeadLetterQueue>,
    config: QueueConfig,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl JobQueue {
    /// Create a new job queue with the given backend.
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dead_letter_max_size);
        Self {
            backend,
            dead_letter: Mutex::new(dlq),
            config,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Create a new in-memory job queue.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryQueueBackend::new()), QueueConfig::default())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a new job, rejecting it when the queue is at capacity.
    pub async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        if self.config.max_size > 0 && self.backend.len().await? >= self.config.max_size {
            return Err(SettleError::queue_full(self.config.max_size)
                .with_context("job_type", &job.metadata.job_type));
        }

        let job_type = job.metadata.job_type.clone();
        let priority = job.metadata.priority;
        self.backend.enqueue(job).await?;

        counter!(
            "settle_queue_enqueued_total",
            "job_type" => job_type,
            "priority" => priority.as_str(),
        )
        .increment(1);
        Ok(())
    }

    /// Put a job back for another attempt. Capacity is not checked.
    pub async fn requeue(&self, job: QueuedJob) -> Result<()> {
        self.backend.enqueue(job).await
    }

    /// Dequeue the next job eligible at `now`.
    pub async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        self.backend.dequeue(now).await
    }

    /// Release a delivered job after it completed, was requeued or was
    /// dead-lettered.
    pub async fn ack(&self, receipt: &str) -> Result<()> {
        self.backend.ack(receipt).await
    }

    /// Return jobs orphaned by a crashed worker to their wait lists.
    pub async fn recover_stalled(&self) -> Result<usize> {
        let recovered = self.backend.recover_stalled().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered unacknowledged jobs");
        }
        Ok(recovered)
    }

    /// Move a job to the dead letter queue.
    pub fn dead_letter(&self, job: QueuedJob) {
        if !self.config.enable_dead_letter {
            return;
        }
        let mut dlq = self.dead_letter.lock();
        dlq.push(job);
        gauge!("settle_queue_dead_letter").set(dlq.len() as f64);
    }

    /// Copy of the jobs currently dead-lettered, oldest first.
    pub fn dead_letters(&self) -> Vec<QueuedJob> {
        self.dead_letter.lock().snapshot()
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub async fn pause(&self) -> Result<()> {
        self.backend.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.backend.resume().await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.backend.is_paused().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty().await
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = self.backend.stats().await?;
        stats.dead_letter += self.dead_letter.lock().len();
        stats.completed = self.completed.load(AtomicOrdering::Relaxed);
        stats.failed = self.failed.load(AtomicOrdering::Relaxed);

        gauge!("settle_queue_pending").set(stats.pending as f64);
        gauge!("settle_queue_delayed").set(stats.delayed as f64);
        gauge!("settle_queue_active").set(stats.active as f64);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::time::Duration;

    fn job(job_type: &str, priority: JobPriority) -> QueuedJob {
        QueuedJob::new(
            JobMetadata::new(job_type).with_priority(priority),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_in_memory_queue() {
        let queue = JobQueue::in_memory();

        queue.enqueue(job("payment-reconciliation", JobPriority::Medium)).await.unwrap();
        let dequeued = queue.dequeue(Utc::now()).await.unwrap();
        assert!(dequeued.is_some());
        assert_eq!(dequeued.unwrap().metadata.job_type, "payment-reconciliation");
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = JobQueue::in_memory();

        queue.enqueue(job("low", JobPriority::Low)).await.unwrap();
        queue.enqueue(job("medium", JobPriority::Medium)).await.unwrap();
        queue.enqueue(job("critical", JobPriority::Critical)).await.unwrap();
        queue.enqueue(job("high", JobPriority::High)).await.unwrap();

        let now = Utc::now();
        let mut order = Vec::new();
        while let Some(job) = queue.dequeue(now).await.unwrap() {
            order.push(job.metadata.job_type);
        }
        assert_eq!(order, vec!["critical", "high", "medium", "low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = JobQueue::in_memory();
        for name in ["first", "second", "third"] {
            queue.enqueue(job(name, JobPriority::Medium)).await.unwrap();
        }

        let now = Utc::now();
        assert_eq!(queue.dequeue(now).await.unwrap().unwrap().metadata.job_type, "first");
        assert_eq!(queue.dequeue(now).await.unwrap().unwrap().metadata.job_type, "second");
        assert_eq!(queue.dequeue(now).await.unwrap().unwrap().metadata.job_type, "third");
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_eligibility() {
        let queue = JobQueue::in_memory();
        let delayed = QueuedJob::new(
            JobMetadata::new("delayed").delayed_by(Duration::from_secs(300)),
            serde_json::json!({}),
        );
        let eligible_at = delayed.metadata.eligible_at;
        queue.enqueue(delayed).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.pending, 0);

        let early = eligible_at - chrono::Duration::seconds(1);
        assert!(queue.dequeue(early).await.unwrap().is_none());

        let job = queue.dequeue(eligible_at).await.unwrap().unwrap();
        assert_eq!(job.metadata.job_type, "delayed");
        assert_eq!(job.metadata.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_promoted_job_still_respects_priority() {
        let queue = JobQueue::in_memory();
        let delayed_low = QueuedJob::new(
            JobMetadata::new("low")
                .with_priority(JobPriority::Low)
                .delayed_by(Duration::from_secs(60)),
            serde_json::json!({}),
        );
        let later = delayed_low.metadata.eligible_at;
        queue.enqueue(delayed_low).await.unwrap();
        queue.enqueue(job("critical", JobPriority::Critical)).await.unwrap();

        let first = queue.dequeue(later).await.unwrap().unwrap();
        assert_eq!(first.metadata.job_type, "critical");
        let second = queue.dequeue(later).await.unwrap().unwrap();
        assert_eq!(second.metadata.job_type, "low");
    }

    #[tokio::test]
    async fn test_pause_blocks_dequeue_but_not_enqueue() {
        let queue = JobQueue::in_memory();
        queue.pause().await.unwrap();
        assert!(queue.is_paused().await.unwrap());

        queue.enqueue(job("paused", JobPriority::High)).await.unwrap();
        assert!(queue.dequeue(Utc::now()).await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);

        queue.resume().await.unwrap();
        assert!(queue.dequeue(Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_queue_full() {
        let config = QueueConfig {
            max_size: 2,
            ..QueueConfig::default()
        };
        let queue = JobQueue::new(Arc::new(InMemoryQueueBackend::new()), config);

        queue.enqueue(job("a", JobPriority::Low)).await.unwrap();
        queue.enqueue(job("b", JobPriority::Low)).await.unwrap();
        let err = queue.enqueue(job("c", JobPriority::Low)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::QueueFull);

        // retries bypass the capacity check
        queue.requeue(job("retry", JobPriority::Low)).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dead_letter_is_bounded() {
        let config = QueueConfig {
            dead_letter_max_size: 2,
            ..QueueConfig::default()
        };
        let queue = JobQueue::new(Arc::new(InMemoryQueueBackend::new()), config);

        for name in ["one", "two", "three"] {
            queue.dead_letter(job(name, JobPriority::Medium));
        }

        let dead: Vec<_> = queue
            .dead_letters()
            .into_iter()
            .map(|job| job.metadata.job_type)
            .collect();
        assert_eq!(dead, vec!["two", "three"]);
        assert_eq!(queue.stats().await.unwrap().dead_letter, 2);
    }

    #[test]
    fn test_redis_key_layout() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let backend = RedisQueueBackend::new(client, DEFAULT_QUEUE_PREFIX);
        assert_eq!(backend.wait_key(JobPriority::Critical), "settle:queue:wait:critical");
        assert_eq!(backend.delayed_key(), "settle:queue:delayed");
        assert_eq!(backend.paused_key(), "settle:queue:paused");
        assert_eq!(backend.active_key(), "settle:queue:active");
        assert_eq!(backend.dead_key(), "settle:queue:dead");
    }

    #[test]
    fn test_lua_routes_match_routed_priorities() {
        for (index, priority) in ROUTED_PRIORITIES.iter().enumerate() {
            let route = format!("{} = {}", priority.as_str(), index + 3);
            assert!(PROMOTE_SCRIPT.contains(&route), "promote script lacks {}", route);
            assert!(RECOVER_SCRIPT.contains(&route), "recover script lacks {}", route);
        }
        assert_eq!(ROUTED_PRIORITIES.len(), JobPriority::ALL.len());
    }

    #[tokio::test]
    async fn test_dequeued_job_stays_active_until_acked() {
        let queue = JobQueue::in_memory();
        queue.enqueue(job("claimed", JobPriority::High)).await.unwrap();

        let delivered = queue.dequeue(Utc::now()).await.unwrap().unwrap();
        let receipt = delivered.receipt().unwrap().to_string();
        assert!(receipt.starts_with(&delivered.metadata.id.to_string()));

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.active, 1);

        queue.ack(&receipt).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().active, 0);
        assert_eq!(queue.recover_stalled().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recover_stalled_redelivers_unacked_job() {
        let queue = JobQueue::in_memory();
        queue.enqueue(job("orphaned", JobPriority::Medium)).await.unwrap();

        // delivered, then the consumer vanished without acknowledging
        let first = queue.dequeue(Utc::now()).await.unwrap().unwrap();
        assert!(queue.dequeue(Utc::now()).await.unwrap().is_none());

        assert_eq!(queue.recover_stalled().await.unwrap(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending, 1);

        let second = queue.dequeue(Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.metadata.id, first.metadata.id);
        assert_ne!(second.receipt(), first.receipt());
    }
}
