// crates/jobs/src/event.rs
//! Event log entries and structured task errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Maximum number of events retained per job. Once the log is full the
/// oldest entry is dropped for each new push (FIFO ring buffer).
pub const EVENT_LOG_CAPACITY: usize = 500;

/// Category of a job event, doubling as the SSE event name on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Info,
    Warning,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Info => "info",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's bounded event log.
///
/// `event_id` starts at 1 and increases by exactly 1 per push within a job,
/// even after older entries have been evicted from the ring buffer. Streaming
/// clients use it as their resume watermark.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub event_id: u64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub data: Map<String, Value>,
}

/// A business-level failure accumulated on a job.
///
/// These describe problems with the tracked work, not with the tracking
/// system; recording one never changes the job's status.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub suggestion: String,
    pub timestamp: DateTime<Utc>,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            suggestion: suggestion.into(),
            timestamp: Utc::now(),
        }
    }
}
