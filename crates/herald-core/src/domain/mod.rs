//! Domain model (ids, job record, status, outcome, decision).

pub mod decision;
pub mod ids;
pub mod job;
pub mod job_type;
pub mod outcome;
pub mod status;

pub use decision::{Decider, Decision, DefaultDecider};
pub use ids::{JobId, ParseJobIdError};
pub use job::{DEFAULT_MAX_ATTEMPTS, EnqueueOptions, Job};
pub use job_type::JobType;
pub use outcome::{Outcome, OutcomeKind};
pub use status::JobStatus;
