//! Scheduler metrics.

/// Metric name constants.
pub mod names {
    /// Executed transitions, labelled by whether the fallback was shown.
    pub const TRANSITIONS_EXECUTED_TOTAL: &str = "playout_scheduler_transitions_executed_total";

    /// Transitions not executed on a run, by reason.
    pub const TRANSITIONS_SKIPPED_TOTAL: &str = "playout_scheduler_transitions_skipped_total";

    /// Delay between a transition's time and its switch, in seconds.
    pub const SWITCH_LAG_SECONDS: &str = "playout_scheduler_switch_lag_seconds";

    /// Alerts raised, by kind.
    pub const ALERTS_TOTAL: &str = "playout_scheduler_alerts_total";

    /// Rooms this instance currently holds the lease for.
    pub const ROOMS_OWNED: &str = "playout_scheduler_rooms_owned";
}
