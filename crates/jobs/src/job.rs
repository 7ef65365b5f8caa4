// crates/jobs/src/job.rs
//! A single tracked unit of background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::{EventKind, JobEvent, StructuredError, EVENT_LOG_CAPACITY};

/// The kind of work a job tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Crawl,
    PreprocessEmbed,
    Reindex,
    Backup,
    Restore,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Crawl => "crawl",
            JobType::PreprocessEmbed => "preprocess_embed",
            JobType::Reindex => "reindex",
            JobType::Backup => "backup",
            JobType::Restore => "restore",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. Transitions are one-way:
/// `queued → running → {succeeded, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal jobs never change status again and are eligible for eviction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Succeeded | JobStatus::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters every job starts with. Task bodies add their own as needed.
const SEED_COUNTERS: [&str; 5] = ["found", "new", "skipped", "failed", "pages"];

/// Everything mutable about a job, guarded by the job's own mutex.
struct JobInner {
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_accessed_at: DateTime<Utc>,
    progress: f64,
    counters: BTreeMap<String, i64>,
    results: BTreeMap<String, Value>,
    errors: Vec<StructuredError>,
    events: VecDeque<JobEvent>,
    next_event_id: u64,
}

/// A tracked background job.
///
/// Shared between exactly one writer (the task body) and any number of
/// concurrent readers (event streams, the stats surface). Every operation
/// takes the job's own lock, so readers never observe a partially appended
/// event or a torn counters/results read. The lock is held only for the
/// duration of the operation; nothing here blocks or sleeps while holding it.
pub struct Job {
    id: String,
    job_type: JobType,
    inner: Mutex<JobInner>,
}

/// Point-in-time copy of a job, used for the first message of a fresh
/// subscription and for the summary endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub counters: BTreeMap<String, i64>,
    pub results: BTreeMap<String, Value>,
    pub errors: Vec<StructuredError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<JobEvent>>,
}

/// What the eviction sweep needs to know about a job. Produced without
/// bumping `last_accessed_at` so the sweep itself cannot distort LRU order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepView {
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(id: String, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            inner: Mutex::new(JobInner {
                status: JobStatus::Queued,
                created_at: now,
                started_at: None,
                finished_at: None,
                last_accessed_at: now,
                progress: 0.0,
                counters: SEED_COUNTERS
                    .iter()
                    .map(|name| (name.to_string(), 0))
                    .collect(),
                results: BTreeMap::new(),
                errors: Vec::new(),
                events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
                next_event_id: 1,
            }),
        }
    }

    // A poisoned lock still holds consistent data (every mutation completes
    // before the guard drops), so recover the guard instead of propagating.
    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn status(&self) -> JobStatus {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner.status
    }

    /// Transition to `running`. Records `started_at` on first call.
    pub fn mark_running(&self) {
        let mut inner = self.lock();
        let now = Utc::now();
        inner.last_accessed_at = now;
        if advance_status(&mut inner, self.id(), JobStatus::Running) {
            inner.started_at = Some(now);
        }
    }

    /// Transition to the `succeeded` terminal state.
    pub fn succeed(&self) {
        self.finish(JobStatus::Succeeded);
    }

    /// Transition to the `failed` terminal state.
    pub fn fail(&self) {
        self.finish(JobStatus::Failed);
    }

    fn finish(&self, terminal: JobStatus) {
        let mut inner = self.lock();
        let now = Utc::now();
        inner.last_accessed_at = now;
        if advance_status(&mut inner, self.id(), terminal) {
            inner.finished_at = Some(now);
        }
    }

    /// Set overall progress, clamped to `[0, 1]`. The structure does not
    /// force monotonicity; callers are expected to only move it forward.
    pub fn set_progress(&self, progress: f64) {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner.progress = progress.clamp(0.0, 1.0);
    }

    /// Add `delta` to a named counter, creating it at zero if absent.
    /// Returns the new value.
    pub fn incr_counter(&self, name: &str, delta: i64) -> i64 {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        let value = inner.counters.entry(name.to_string()).or_insert(0);
        *value += delta;
        *value
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner.counters.insert(name.to_string(), value);
    }

    pub fn insert_result(&self, name: &str, value: Value) {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner.results.insert(name.to_string(), value);
    }

    /// Record a structured business error. Accumulates; never changes status.
    pub fn add_error(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        let error = StructuredError::new(code, message, suggestion);
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner.errors.push(error);
    }

    /// Append an event to the log, assigning the next `event_id` and trimming
    /// the log to capacity from the front. Never fails.
    ///
    /// `data` should be a JSON object; `Null` becomes an empty payload and
    /// any other value is wrapped under a `"value"` key.
    pub fn push(&self, kind: EventKind, message: impl Into<String>, data: Value) -> JobEvent {
        let mut inner = self.lock();
        let now = Utc::now();
        inner.last_accessed_at = now;
        let event = JobEvent {
            event_id: inner.next_event_id,
            ts: now,
            kind,
            message: message.into(),
            data: coerce_payload(data),
        };
        inner.next_event_id += 1;
        inner.events.push_back(event.clone());
        while inner.events.len() > EVENT_LOG_CAPACITY {
            inner.events.pop_front();
        }
        event
    }

    /// All events with `event_id` strictly greater than `since`, ascending.
    /// Entries already evicted from the ring buffer are gone for good.
    pub fn get_events_since(&self, since: u64) -> Vec<JobEvent> {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        inner
            .events
            .iter()
            .filter(|event| event.event_id > since)
            .cloned()
            .collect()
    }

    /// Immutable copy of the job without its event log.
    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot_inner(false)
    }

    /// Immutable copy of the job including the full current event log.
    pub fn snapshot_with_events(&self) -> JobSnapshot {
        self.snapshot_inner(true)
    }

    fn snapshot_inner(&self, include_events: bool) -> JobSnapshot {
        let mut inner = self.lock();
        inner.last_accessed_at = Utc::now();
        JobSnapshot {
            id: self.id.clone(),
            job_type: self.job_type,
            status: inner.status,
            created_at: inner.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            progress: inner.progress,
            counters: inner.counters.clone(),
            results: inner.results.clone(),
            errors: inner.errors.clone(),
            events: include_events.then(|| inner.events.iter().cloned().collect()),
        }
    }

    pub(crate) fn sweep_view(&self) -> SweepView {
        let inner = self.lock();
        SweepView {
            status: inner.status,
            created_at: inner.created_at,
            last_accessed_at: inner.last_accessed_at,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("type", &self.job_type)
            .finish_non_exhaustive()
    }
}

/// Apply a status transition if it moves forward; ignore (and log) anything
/// that would go backwards or leave a terminal state.
fn advance_status(inner: &mut JobInner, id: &str, to: JobStatus) -> bool {
    let from = inner.status;
    if from.is_terminal() || to.rank() <= from.rank() {
        tracing::warn!(job_id = id, %from, %to, "ignoring regressive status transition");
        return false;
    }
    inner.status = to;
    true
}

fn coerce_payload(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
