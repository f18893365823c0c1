//! Decision model: what happens to a job after an attempt.
//!
//! The dispatcher executes decisions; deciders only produce them.

use std::time::Duration;

use super::job::Job;
use super::outcome::Outcome;
use crate::queue::RetryPolicy;

/// The next action to take for a job that just finished an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Complete,

    /// Make the job eligible again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up (terminal).
    Fail { reason: String },
}

/// Decides the next action based on job state and outcome.
///
/// Deciders are pure functions: given the job (with `attempts` already
/// counting the attempt that produced `outcome`), return the next action
/// without side effects.
pub trait Decider: Send + Sync {
    fn decide(&self, job: &Job, outcome: &Outcome) -> Decision;
}

/// Attempt-based retry with exponential backoff:
/// - Retry if attempts < max_attempts
/// - Fail if attempts >= max_attempts
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &Job, outcome: &Outcome) -> Decision {
        if outcome.is_success() {
            return Decision::Complete;
        }

        let reason = outcome.reason_or_default();
        if job.attempts >= job.max_attempts {
            Decision::Fail { reason }
        } else {
            Decision::Retry {
                delay: self.retry_policy.next_delay(job.attempts),
                reason,
            }
        }
    }
}
