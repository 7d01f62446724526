//! Structured job logging.

use tracing::{error, info, warn, Span};

/// Consistent lifecycle log lines for prepare and render jobs.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
}

impl JobLogger {
    /// `operation` is a short static label such as `"render"` or `"prepare"`.
    pub fn new(job_id: impl ToString, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, operation = self.operation, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, operation = self.operation, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span carrying the job id for nested log lines.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_models::RenderJobId;

    #[test]
    fn test_job_logger_from_typed_id() {
        let id = RenderJobId::from_string("render-1");
        let logger = JobLogger::new(&id, "render");
        assert_eq!(logger.job_id(), "render-1");
        assert_eq!(logger.operation(), "render");
    }
}
