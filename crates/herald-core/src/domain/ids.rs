//! Job identifiers.
//!
//! Job ids are ULIDs: sortable by creation time and generated without any
//! coordination. They render as `job-<ULID>` so they are easy to spot in logs
//! and API payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a queued job.
///
/// Assigned at enqueue time and stable for the job's lifetime.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job id '{input}': {source}")]
pub struct ParseJobIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// Accepts both `job-<ULID>` and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|source| ParseJobIdError {
                input: s.to_string(),
                source,
            })
    }
}
