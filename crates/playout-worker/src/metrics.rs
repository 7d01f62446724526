//! Worker metrics.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric name constants.
pub mod names {
    /// Prepare jobs started, by initial outcome.
    pub const PREPARE_JOBS_TOTAL: &str = "playout_worker_prepare_jobs_total";

    /// Render jobs by final outcome.
    pub const RENDER_JOBS_TOTAL: &str = "playout_worker_render_jobs_total";

    /// Render job wall time in seconds.
    pub const RENDER_JOB_SECONDS: &str = "playout_worker_render_job_seconds";

    /// Render jobs currently executing on this worker.
    pub const RENDER_JOBS_ACTIVE: &str = "playout_worker_render_jobs_active";

    /// IN_PROGRESS jobs failed by the stale detector.
    pub const STALE_JOBS_TOTAL: &str = "playout_worker_stale_jobs_total";
}

pub fn record_prepare(outcome: &'static str) {
    counter!(names::PREPARE_JOBS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_render(outcome: &'static str, elapsed: Duration) {
    counter!(names::RENDER_JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::RENDER_JOB_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn set_active(active: usize) {
    gauge!(names::RENDER_JOBS_ACTIVE).set(active as f64);
}

pub fn record_stale(count: usize) {
    counter!(names::STALE_JOBS_TOTAL).increment(count as u64);
}
