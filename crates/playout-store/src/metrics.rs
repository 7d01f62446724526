//! Store metrics.
//!
//! - Operation counters by backend, operation and outcome
//! - Latency histograms
//! - Lost compare-and-set races

use std::time::Instant;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by backend, operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "playout_store_operations_total";

    /// Operation latency in seconds by backend and operation.
    pub const LATENCY_SECONDS: &str = "playout_store_latency_seconds";

    /// Compare-and-set attempts that lost to a concurrent writer.
    pub const CAS_CONFLICTS_TOTAL: &str = "playout_store_cas_conflicts_total";
}

/// Record metrics for a completed store operation.
pub fn record_operation(backend: &'static str, operation: &'static str, ok: bool, started: Instant) {
    counter!(
        names::OPERATIONS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "backend" => backend,
        "operation" => operation
    )
    .record(started.elapsed().as_secs_f64());
}

/// Record a lost compare-and-set race.
pub fn record_cas_conflict(backend: &'static str, operation: &'static str) {
    counter!(
        names::CAS_CONFLICTS_TOTAL,
        "backend" => backend,
        "operation" => operation
    )
    .increment(1);
}
