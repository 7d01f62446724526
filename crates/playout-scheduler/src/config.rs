//! Scheduler configuration.

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identity used as the lease holder
    pub instance_id: String,
    /// A transition counts as due this long before its time
    pub tolerance: Duration,
    /// Upper bound on how long a room sleeps before re-reading its schedule
    pub poll_interval: Duration,
    /// How often the room list is rescanned and leases renewed
    pub room_refresh_interval: Duration,
    /// Room lease lifetime; must comfortably exceed `room_refresh_interval`
    pub lease_ttl: Duration,
    /// Switcher endpoint. Switches are only logged when unset
    pub switcher_url: Option<String>,
    pub switcher_timeout: Duration,
    /// Webhook for operational alerts. Alerts are only logged when unset
    pub alert_webhook_url: Option<String>,
    /// Prometheus scrape endpoint, if any
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("scheduler-{}", Uuid::new_v4()),
            tolerance: Duration::from_millis(500),
            poll_interval: Duration::from_secs(5),
            room_refresh_interval: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(30),
            switcher_url: None,
            switcher_timeout: Duration::from_secs(5),
            alert_webhook_url: None,
            metrics_addr: None,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            instance_id: std::env::var("SCHEDULER_INSTANCE_ID").unwrap_or(defaults.instance_id),
            tolerance: env_parse("SCHEDULER_TOLERANCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tolerance),
            poll_interval: env_parse("SCHEDULER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            room_refresh_interval: env_parse("SCHEDULER_ROOM_REFRESH_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.room_refresh_interval),
            lease_ttl: env_parse("SCHEDULER_LEASE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            switcher_url: std::env::var("SWITCHER_URL").ok().filter(|s| !s.is_empty()),
            switcher_timeout: env_parse("SWITCHER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.switcher_timeout),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            metrics_addr: env_parse("SCHEDULER_METRICS_ADDR"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
