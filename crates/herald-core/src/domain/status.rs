//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Retrying -> Processing (loop until max_attempts)
/// - Pending -> Processing -> Failed (when max_attempts is reached)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Enqueued, never attempted.
    Pending,

    /// A processor invocation is in flight.
    Processing,

    /// Processor returned successfully.
    Completed,

    /// Last attempt failed; waiting for the backoff to elapse.
    Retrying,

    /// Failed permanently (max_attempts reached).
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Can a job in this status be picked up by the dispatcher (time permitting)?
    pub fn is_dispatchable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Retrying, Processing)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
        )
    }
}
