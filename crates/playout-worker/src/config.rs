//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent render jobs
    pub max_concurrent_jobs: usize,
    /// Upper bound on one render, retries included
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How long a queue read blocks waiting for announcements
    pub queue_block: Duration,
    /// How often the store is swept for NEW jobs the queue never delivered
    pub sweep_interval: Duration,
    /// How often IN_PROGRESS jobs are checked against `job_timeout`
    pub stale_check_interval: Duration,
    /// Age after which a prepare job still NEW is treated as orphaned
    pub prepare_orphan_timeout: Duration,
    /// Retries after the first attempt for transient encoder errors
    pub encoder_max_retries: u32,
    /// Base delay for retry backoff (doubles each attempt)
    pub retry_base_delay: Duration,
    /// Prometheus scrape endpoint, if any
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            queue_block: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(60),
            prepare_orphan_timeout: Duration::from_secs(300),
            encoder_max_retries: 2,
            retry_base_delay: Duration::from_secs(2),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT").unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            queue_block: env_parse("WORKER_QUEUE_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_block),
            sweep_interval: env_secs("WORKER_SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval),
            stale_check_interval: env_secs("WORKER_STALE_CHECK_SECS").unwrap_or(defaults.stale_check_interval),
            prepare_orphan_timeout: env_secs("WORKER_PREPARE_ORPHAN_SECS").unwrap_or(defaults.prepare_orphan_timeout),
            encoder_max_retries: env_parse("WORKER_ENCODER_RETRIES").unwrap_or(defaults.encoder_max_retries),
            retry_base_delay: env_parse("WORKER_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            metrics_addr: env_parse("WORKER_METRICS_ADDR"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse(key).map(Duration::from_secs)
}
