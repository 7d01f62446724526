//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    /// First backoff; doubles per attempt up to `max_delay`
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the retry budget runs out. The last error is returned.
pub async fn retry_async<F, Fut, T, E, P>(config: &RetryConfig, should_retry: P, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!("{} gave up after {} attempts", config.operation_name, attempt + 1);
                return Err(e);
            }
        }
    }
}

/// Logs the first few consecutive failures of a background loop, then goes
/// quiet until the loop succeeds again.
#[derive(Debug)]
pub struct FailureTracker {
    streak: u32,
    loud: u32,
}

impl FailureTracker {
    pub fn new(loud: u32) -> Self {
        Self { streak: 0, loud }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.loud {
            info!(failures = self.streak, "Background loop recovered");
        }
        self.streak = 0;
    }

    /// Whether this failure is worth a log line.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.loud + 1 {
            warn!(failures = self.streak, "Muting repeated failures until the next success");
        }
        self.streak <= self.loud
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}
