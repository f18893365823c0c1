//! Job record: identity + payload + lifecycle state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::job_type::JobType;
use super::status::JobStatus;

/// Attempts allowed when neither the caller nor the config says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One unit of asynchronous work.
///
/// Design:
/// - This is the single source of truth for a job's state.
/// - `id`, `job_type`, `payload` and `created_at` never change after enqueue.
/// - All state transitions happen through the methods below, and only the
///   dispatcher for `job_type` calls them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,

    /// Higher dispatches first.
    pub priority: i32,

    /// Number of processor invocations so far (including the current one if Processing).
    pub attempts: u32,
    pub max_attempts: u32,

    pub created_at: DateTime<Utc>,

    /// Earliest time the job may be dispatched.
    pub scheduled_at: DateTime<Utc>,

    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    /// Last failure message (if any).
    pub error: Option<String>,

    pub status: JobStatus,
}

impl Job {
    pub fn new(id: JobId, job_type: JobType, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type,
            payload,
            priority: 0,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: now,
            scheduled_at: now,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            status: JobStatus::Pending,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A job is always attempted at least once, so 0 is treated as 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.scheduled_at = offset(self.created_at, delay);
        self
    }

    /// Eligible for dispatch at `now`?
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dispatchable() && self.scheduled_at <= now
    }

    /// Mark as processing (increment attempts).
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.transition(JobStatus::Processing);
        self.attempts += 1;
        self.processed_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.transition(JobStatus::Completed);
        self.completed_at = Some(now);
    }

    /// Record the failure and push `scheduled_at` out to `retry_at`.
    pub fn schedule_retry(&mut self, now: DateTime<Utc>, retry_at: DateTime<Utc>, error: String) {
        self.transition(JobStatus::Retrying);
        self.failed_at = Some(now);
        self.scheduled_at = retry_at;
        self.error = Some(error);
    }

    /// Mark as failed (max attempts reached).
    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: String) {
        self.transition(JobStatus::Failed);
        self.failed_at = Some(now);
        self.error = Some(error);
    }

    fn transition(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }
}

/// Options a caller may pass to `enqueue`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: i32,

    /// Falls back to the queue's configured default.
    pub max_attempts: Option<u32>,

    /// Time before the first attempt becomes eligible.
    pub delay: Duration,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// `at + delay`, saturating at the latest representable instant.
pub(crate) fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
