use serde::{Deserialize, Serialize};

/// Per-type counters returned by `QueueService::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,

    /// A processor invocation for this type is in flight.
    pub is_busy: bool,

    /// The type's dispatcher has been paused.
    pub is_paused: bool,
}
