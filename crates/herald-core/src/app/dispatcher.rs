//! Dispatcher - job type ごとの実行ループ
//!
//! # フロー
//! 1. poll interval / wake signal / stop signal のいずれかを待つ
//! 2. 完了済み job の GC
//! 3. busy でなければ next_ready(now) を取り出し processing にする
//! 4. Processor 実行 → Outcome
//! 5. Decider 実行 → Decision を job に反映
//! 6. 実行した場合は即座に 3 へ戻る

use std::any::Any;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::lane::Lane;
use super::service::Shared;
use crate::domain::job::offset;
use crate::domain::{Decision, JobId, JobStatus, Outcome};
use crate::error::HeraldError;
use crate::typed::{DynProcessor, JobContext};

/// Handle to a lane's dispatcher task.
///
/// - `stop()` は停止を要求するだけで、実行中の processor は最後まで走り記録される
/// - 停止済みの JoinHandle は `retired` に残し、shutdown 時に join する
#[derive(Default)]
pub(crate) struct DispatcherSlot {
    active: Option<ActiveDispatcher>,
    retired: Vec<JoinHandle<()>>,
}

struct ActiveDispatcher {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherSlot {
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.join.is_finished())
    }

    /// Spawn the loop unless one is already running. Returns whether a new
    /// loop was started.
    pub fn start(&mut self, shared: Arc<Shared>, lane: Arc<Lane>) -> Result<bool, HeraldError> {
        if self.is_running() {
            return Ok(false);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| HeraldError::NoRuntime(lane.job_type().to_string()))?;

        self.stop();
        self.retired.retain(|join| !join.is_finished());

        let (stop_tx, stop_rx) = watch::channel(false);
        let join = handle.spawn(Dispatcher::new(shared, lane).run(stop_rx));
        self.active = Some(ActiveDispatcher { stop_tx, join });
        Ok(true)
    }

    /// Request the loop to stop. Returns whether one was active.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                // ignore send error: the loop may already have exited
                let _ = active.stop_tx.send(true);
                self.retired.push(active.join);
                true
            }
            None => false,
        }
    }

    /// Stop and hand over every join handle, active or retired.
    pub fn take_joins(&mut self) -> Vec<JoinHandle<()>> {
        self.stop();
        std::mem::take(&mut self.retired)
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tick {
    Idle,
    Paused,
    Busy,
    NoProcessor,

    /// A job was executed. `status` is `None` if it was removed meanwhile.
    Ran {
        job_id: JobId,
        status: Option<JobStatus>,
    },
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    lane: Arc<Lane>,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>, lane: Arc<Lane>) -> Self {
        Self { shared, lane }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let job_type = self.lane.job_type().clone();
        info!(%job_type, "dispatcher started");

        let period = self.shared.config.poll_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if is_stopped(&stop_rx) {
                break;
            }

            tokio::select! {
                changed = stop_rx.changed() => {
                    // sender dropped: the service is gone
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = self.lane.notified() => {}
            }

            while !is_stopped(&stop_rx) {
                match self.dispatch_once().await {
                    Tick::Ran { job_id, status } => {
                        debug!(%job_id, %job_type, ?status, "attempt recorded");
                    }
                    _ => break,
                }
            }
        }

        info!(%job_type, "dispatcher stopped");
    }

    /// Run at most one ready job.
    pub async fn dispatch_once(&self) -> Tick {
        let now = self.shared.clock.now();
        let job_type = self.lane.job_type();

        let (processor, ctx) = {
            let mut state = self
                .lane
                .lock_collected(now, self.shared.config.completed_retention());

            if state.paused {
                return Tick::Paused;
            }
            if state.busy {
                return Tick::Busy;
            }
            let Some(job_id) = state.queue.next_ready(now).map(|job| job.id) else {
                return Tick::Idle;
            };
            let Some(processor) = self.shared.registry.get(job_type) else {
                debug!(%job_type, "ready job but no processor registered");
                return Tick::NoProcessor;
            };
            let Some(ctx) = state.queue.update(job_id, |job| {
                job.start_attempt(now);
                JobContext::from_job(job)
            }) else {
                return Tick::Idle;
            };
            state.busy = true;
            (processor, ctx)
        };
        let busy = BusyGuard {
            lane: &self.lane,
            armed: true,
        };

        let job_id = ctx.id;
        debug!(%job_id, %job_type, attempt = ctx.attempt, "dispatching job");

        let outcome = self.invoke(processor, ctx).await;
        // record() clears the flag under the same lock that applies the result
        let status = self.record(job_id, outcome);
        busy.disarm();

        Tick::Ran { job_id, status }
    }

    /// Run the processor on its own task so a panic or timeout becomes an
    /// ordinary failure.
    async fn invoke(&self, processor: Arc<dyn DynProcessor>, ctx: JobContext<serde_json::Value>) -> Outcome {
        let mut task = tokio::spawn(async move { processor.process_dyn(ctx).await });

        let joined = match self.shared.config.processor_timeout() {
            Some(limit) => match time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    // the lane stays busy until the aborted invocation is gone
                    task.abort();
                    let _ = task.await;
                    return Outcome::failure(format!("processor timed out after {limit:?}"));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => Outcome::from(result),
            Err(err) if err.is_panic() => Outcome::failure(format!(
                "processor panicked: {}",
                panic_message(err.into_panic())
            )),
            Err(err) => Outcome::failure(format!("processor task cancelled: {err}")),
        }
    }

    /// Apply the decider's verdict to the job. Returns the new status, or
    /// `None` if the job is no longer in the queue.
    fn record(&self, job_id: JobId, outcome: Outcome) -> Option<JobStatus> {
        let now = self.shared.clock.now();
        let job_type = self.lane.job_type();
        let decider = &self.shared.decider;

        let mut state = self.lane.lock();
        let status = state.queue.update(job_id, |job| {
            match decider.decide(job, &outcome) {
                Decision::Complete => {
                    job.mark_completed(now);
                    info!(%job_id, %job_type, attempt = job.attempts, "job completed");
                }
                Decision::Retry { delay, reason } => {
                    warn!(
                        %job_id,
                        %job_type,
                        attempt = job.attempts,
                        max_attempts = job.max_attempts,
                        retry_in = ?delay,
                        error = %reason,
                        "job failed, will retry"
                    );
                    job.schedule_retry(now, offset(now, delay), reason);
                }
                Decision::Fail { reason } => {
                    info!(
                        %job_id,
                        %job_type,
                        attempt = job.attempts,
                        error = %reason,
                        "job failed permanently"
                    );
                    job.mark_failed(now, reason);
                }
            }
            job.status
        });
        state.busy = false;
        drop(state);

        if status.is_none() {
            warn!(%job_id, %job_type, success = outcome.is_success(), "job removed while processing, result dropped");
        }
        status
    }
}

/// Clears the lane's busy flag if `dispatch_once` is dropped mid-invocation.
struct BusyGuard<'a> {
    lane: &'a Lane,
    armed: bool,
}

impl BusyGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lane.lock().busy = false;
        }
    }
}

fn is_stopped(stop_rx: &watch::Receiver<bool>) -> bool {
    *stop_rx.borrow()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
