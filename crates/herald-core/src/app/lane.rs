//! Lane - per-type state shared by the facade and that type's dispatcher.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::debug;

use super::dispatcher::DispatcherSlot;
use crate::domain::JobType;
use crate::queue::{QueueStats, TypeQueue};

/// Everything guarded by the per-type lock.
#[derive(Debug, Default)]
pub(crate) struct LaneState {
    pub queue: TypeQueue,

    /// A processor invocation is in flight. Set before invoking, cleared by `BusyGuard`.
    pub busy: bool,

    pub paused: bool,
}

/// One job type: its queue, flags, wake signal and dispatcher handle.
///
/// Lock order: `dispatcher` before `state` when both are needed. Neither
/// lock is held across an `.await`.
pub(crate) struct Lane {
    job_type: JobType,
    state: Mutex<LaneState>,
    wake: Notify,
    dispatcher: Mutex<DispatcherSlot>,
}

impl Lane {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            state: Mutex::new(LaneState::default()),
            wake: Notify::new(),
            dispatcher: Mutex::new(DispatcherSlot::default()),
        }
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatcher(&self) -> MutexGuard<'_, DispatcherSlot> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the dispatcher early. A permit is stored if it is not waiting yet.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Lock the state after dropping completed jobs past `retention`.
    ///
    /// Facade reads call this too, so a paused or stopped lane still ages out.
    pub fn lock_collected(&self, now: DateTime<Utc>, retention: Duration) -> MutexGuard<'_, LaneState> {
        let mut state = self.lock();
        let purged = state.queue.purge_completed(now, retention);
        if purged > 0 {
            debug!(job_type = %self.job_type, purged, "purged completed jobs");
        }
        state
    }

    pub fn stats(&self, now: DateTime<Utc>, retention: Duration) -> QueueStats {
        let state = self.lock_collected(now, retention);
        QueueStats {
            is_busy: state.busy,
            is_paused: state.paused,
            ..state.queue.stats()
        }
    }
}
