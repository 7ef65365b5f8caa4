// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use ragpipe_jobs::{JobStatus, JobType};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }
    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();
    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("ragpipe_jobs_created_total", "Jobs created, by type");
    describe_counter!(
        "ragpipe_jobs_finished_total",
        "Jobs reaching a terminal state, by type and status"
    );
    describe_histogram!(
        "ragpipe_job_duration_seconds",
        "Wall-clock duration of finished jobs, by type"
    );
    describe_gauge!("ragpipe_jobs_in_store", "Jobs currently held in memory");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a newly created job.
pub fn record_job_created(job_type: JobType, jobs_in_store: usize) {
    counter!("ragpipe_jobs_created_total", "type" => job_type.as_str()).increment(1);
    gauge!("ragpipe_jobs_in_store").set(jobs_in_store as f64);
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(job_type: JobType, status: JobStatus, duration: Duration) {
    counter!(
        "ragpipe_jobs_finished_total",
        "type" => job_type.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
    histogram!("ragpipe_job_duration_seconds", "type" => job_type.as_str())
        .record(duration.as_secs_f64());
}
