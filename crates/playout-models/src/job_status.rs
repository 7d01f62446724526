//! Job lifecycle shared by prepare jobs and render jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ModelError;

/// Job processing status.
///
/// The only valid moves are `NEW -> IN_PROGRESS -> {COMPLETED, FAILED}`.
/// Terminal states are final; a failed job is superseded by a new job rather
/// than reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not yet picked up
    #[default]
    New,
    /// Claimed by a worker (render job) or fanned out (prepare job)
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error message
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::New,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an allowed lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::New, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }

    /// Validate a lifecycle step, returning the target status.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, ModelError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::InvalidStatusTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownJobStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(JobStatus::New.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_rejected_transitions() {
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                let allowed = matches!(
                    (from, to),
                    (JobStatus::New, JobStatus::InProgress)
                        | (JobStatus::InProgress, JobStatus::Completed)
                        | (JobStatus::InProgress, JobStatus::Failed)
                );
                assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
            }
        }

        let err = JobStatus::Completed.transition(JobStatus::InProgress).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidStatusTransition {
                from: JobStatus::Completed,
                to: JobStatus::InProgress
            }
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::New.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&JobStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("failed".parse::<JobStatus>().is_err());
    }
}
