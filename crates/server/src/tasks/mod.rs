// crates/server/src/tasks/mod.rs
//! Task bodies and the dispatch harness that runs them.
//!
//! One dispatch per created job, fire-and-forget: the creating request
//! returns the job id immediately and the body runs on its own tokio task.
//! The harness owns the lifecycle edges: it flips the job to `running` and
//! guarantees a terminal state afterwards whether the body returns `Ok`,
//! returns `Err`, or panics.

pub mod crawl;
pub mod maintenance;
pub mod pipeline;

use futures_util::FutureExt;
use ragpipe_jobs::{EventKind, Job};
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// A business-level task failure, mapped 1:1 onto a job's structured errors.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: &'static str,
    pub message: String,
    pub suggestion: String,
}

impl TaskError {
    pub fn new(
        code: &'static str,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

pub type TaskResult = Result<(), TaskError>;

/// Run a task body against its job.
///
/// The job always ends terminal: `succeeded` on `Ok`, `failed` with the
/// structured error recorded on `Err`, and `failed` with a `TASK_PANIC`
/// error if the body panics. A body that never returns leaves the job
/// `running` forever; there is no watchdog.
pub fn dispatch<Fut>(job: Arc<Job>, body: Fut)
where
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    tokio::spawn(async move {
        let started = Instant::now();
        job.mark_running();
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => {
                job.set_progress(1.0);
                job.succeed();
            }
            Ok(Err(error)) => {
                job.add_error(error.code, &error.message, &error.suggestion);
                job.push(
                    EventKind::Error,
                    error.message.clone(),
                    json!({"code": error.code}),
                );
                job.fail();
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                job.add_error(
                    "TASK_PANIC",
                    &message,
                    "check the server logs for a stack trace",
                );
                job.push(
                    EventKind::Error,
                    format!("task panicked: {message}"),
                    Value::Null,
                );
                job.fail();
            }
        }
        let status = job.status();
        crate::metrics::record_job_finished(job.job_type(), status, started.elapsed());
        tracing::info!(
            job_id = %job.id(),
            job_type = %job.job_type(),
            %status,
            duration_secs = started.elapsed().as_secs_f64(),
            "job finished"
        );
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
