//! QueueService - job queue の公開 API
//!
//! # 学習ポイント
//! - `Arc<Inner>` + `#[derive(Clone)]` による共有ハンドル
//! - ロックの粒度: service 全体は lane map の lookup のみ、それ以外は lane 単位
//! - Drop で dispatcher に停止を通知

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use tracing::{debug, info, warn};

use super::lane::{Lane, LaneState};
use crate::config::QueueConfig;
use crate::domain::{Decider, DefaultDecider, EnqueueOptions, Job, JobId, JobStatus, JobType};
use crate::error::HeraldError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::QueueStats;
use crate::typed::{DynProcessor, JobPayload, Processor, ProcessorRegistry, TypedProcessor};

/// State every dispatcher reads.
pub(crate) struct Shared {
    pub config: QueueConfig,
    pub clock: Arc<dyn Clock>,
    pub decider: Arc<dyn Decider>,
    pub registry: ProcessorRegistry,
}

/// Handle to an in-process job queue.
///
/// Cloning is cheap and every clone talks to the same queues. Dropping the
/// last clone asks all dispatchers to stop; call [`QueueService::shutdown`]
/// to also wait for in-flight jobs to be recorded.
///
/// # 使用例
/// ```ignore
/// let service = QueueService::new(QueueConfig::default())?;
/// service.register::<SendMail, _>(SendMailProcessor)?;
///
/// let id = service.enqueue(&SendMail { to: "parent@example.com".into() }, EnqueueOptions::new())?;
/// let snapshot = service.job_status(id);
/// ```
#[derive(Clone)]
pub struct QueueService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    shared: Arc<Shared>,
    ids: Arc<dyn IdGenerator>,
    lanes: RwLock<HashMap<JobType, Arc<Lane>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        let lanes = self.lanes.get_mut().unwrap_or_else(PoisonError::into_inner);
        for lane in lanes.values() {
            lane.dispatcher().stop();
        }
    }
}

impl QueueService {
    /// Service on the system clock with ULID ids and exponential backoff.
    pub fn new(config: QueueConfig) -> Result<Self, HeraldError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let decider = Arc::new(DefaultDecider::new(config.retry_policy()));
        Ok(Self::from_parts(config, clock, ids, decider))
    }

    pub(crate) fn from_parts(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        decider: Arc<dyn Decider>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                shared: Arc::new(Shared {
                    config,
                    clock,
                    decider,
                    registry: ProcessorRegistry::new(),
                }),
                ids,
                lanes: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.shared.config
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    /// Register the processor for `T::TYPE` and start its dispatcher.
    pub fn register<T: JobPayload, P: Processor<T> + 'static>(
        &self,
        processor: P,
    ) -> Result<(), HeraldError> {
        self.register_dyn(T::TYPE, TypedProcessor::<T, P>::new(processor))
    }

    /// Register an untyped processor under an arbitrary job type.
    ///
    /// Registering a type again replaces its processor; the running
    /// dispatcher picks the new one up on its next dispatch.
    pub fn register_dyn<P: DynProcessor + 'static>(
        &self,
        job_type: impl Into<JobType>,
        processor: P,
    ) -> Result<(), HeraldError> {
        self.register_arc(job_type.into(), Arc::new(processor))
    }

    pub(crate) fn register_arc(
        &self,
        job_type: JobType,
        processor: Arc<dyn DynProcessor>,
    ) -> Result<(), HeraldError> {
        let lane = self.lane_or_create(&job_type);

        {
            let mut slot = lane.dispatcher();
            if lane.lock().paused {
                info!(%job_type, "queue is paused, dispatcher starts on resume");
            } else {
                slot.start(Arc::clone(&self.inner.shared), Arc::clone(&lane))?;
            }
        }

        let replaced = self
            .inner
            .shared
            .registry
            .register_dyn(job_type.clone(), processor);
        info!(%job_type, replaced, "processor registered");

        lane.wake();
        Ok(())
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.inner.shared.registry.registered_types()
    }

    // ------------------------------------------------------------------
    // enqueue
    // ------------------------------------------------------------------

    /// Serialize `payload` and enqueue it under `T::TYPE`.
    pub fn enqueue<T: JobPayload>(
        &self,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<JobId, HeraldError> {
        let value = serde_json::to_value(payload).map_err(|source| HeraldError::PayloadEncode {
            job_type: T::TYPE.to_string(),
            source,
        })?;
        Ok(self.enqueue_json(T::TYPE, value, options))
    }

    /// Enqueue a raw JSON payload. Never waits for processing.
    pub fn enqueue_json(
        &self,
        job_type: impl Into<JobType>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> JobId {
        let job_type = job_type.into();
        let shared = &self.inner.shared;
        let now = shared.clock.now();
        let job_id = self.inner.ids.generate_job_id();

        let max_attempts = options
            .max_attempts
            .unwrap_or(shared.config.default_max_attempts);
        let job = Job::new(job_id, job_type.clone(), payload, now)
            .with_priority(options.priority)
            .with_max_attempts(max_attempts)
            .with_delay(options.delay);

        let lane = self.lane_or_create(&job_type);
        lane.lock().queue.insert(job);

        if !shared.registry.contains(&job_type) {
            warn!(%job_id, %job_type, "no processor registered for job type, job stays pending");
        }
        debug!(
            %job_id,
            %job_type,
            priority = options.priority,
            delay = ?options.delay,
            "job enqueued"
        );

        lane.wake();
        job_id
    }

    // ------------------------------------------------------------------
    // inspection
    // ------------------------------------------------------------------

    /// Latest snapshot of a job, or `None` if it never existed or was purged.
    pub fn job_status(&self, job_id: JobId) -> Option<Job> {
        self.lanes()
            .iter()
            .find_map(|lane| self.collect(lane).queue.get(job_id).cloned())
    }

    pub fn stats(&self, job_type: &JobType) -> Option<QueueStats> {
        let (now, retention) = self.retention_now();
        self.lane(job_type).map(|lane| lane.stats(now, retention))
    }

    pub fn all_stats(&self) -> BTreeMap<JobType, QueueStats> {
        let (now, retention) = self.retention_now();
        self.lanes()
            .iter()
            .map(|lane| (lane.job_type().clone(), lane.stats(now, retention)))
            .collect()
    }

    /// Jobs of one type in dispatch order.
    pub fn list_jobs(&self, job_type: &JobType) -> Vec<Job> {
        let Some(lane) = self.lane(job_type) else {
            return Vec::new();
        };
        let state = self.collect(&lane);
        state.queue.iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // mutation
    // ------------------------------------------------------------------

    /// Remove a job that is not currently processing.
    pub fn remove_job(&self, job_id: JobId) -> bool {
        for lane in self.lanes() {
            let mut state = lane.lock();
            let Some(job) = state.queue.get(job_id) else {
                continue;
            };
            if job.status == JobStatus::Processing {
                warn!(%job_id, job_type = %lane.job_type(), "refusing to remove a processing job");
                return false;
            }
            state.queue.remove(job_id);
            debug!(%job_id, job_type = %lane.job_type(), "job removed");
            return true;
        }
        false
    }

    /// Drop every job of `job_type`. A job in flight finishes but its
    /// result is discarded.
    pub fn clear_queue(&self, job_type: &JobType) -> usize {
        let Some(lane) = self.lane(job_type) else {
            return 0;
        };
        let cleared = lane.lock().queue.clear();
        info!(%job_type, cleared, "queue cleared");
        cleared
    }

    /// Stop dispatching `job_type`. A job in flight still completes and is
    /// recorded.
    pub fn pause_queue(&self, job_type: &JobType) {
        let lane = self.lane_or_create(job_type);
        let mut slot = lane.dispatcher();
        lane.lock().paused = true;
        slot.stop();
        info!(%job_type, "queue paused");
    }

    /// Restart dispatching `job_type` if it is not already running and a
    /// processor is registered.
    pub fn resume_queue(&self, job_type: &JobType) -> Result<(), HeraldError> {
        let Some(lane) = self.lane(job_type) else {
            return Ok(());
        };

        {
            let mut slot = lane.dispatcher();
            if self.inner.shared.registry.contains(job_type) {
                slot.start(Arc::clone(&self.inner.shared), Arc::clone(&lane))?;
            }
            lane.lock().paused = false;
        }
        info!(%job_type, "queue resumed");

        lane.wake();
        Ok(())
    }

    /// Stop every dispatcher and wait until in-flight jobs are recorded.
    pub async fn shutdown(&self) {
        let joins: Vec<_> = self
            .lanes()
            .iter()
            .flat_map(|lane| lane.dispatcher().take_joins())
            .collect();
        for join in joins {
            // a dispatcher that panicked has nothing left to record
            let _ = join.await;
        }
        info!("queue service stopped");
    }

    // ------------------------------------------------------------------

    fn lane(&self, job_type: &JobType) -> Option<Arc<Lane>> {
        self.inner
            .lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    fn lane_or_create(&self, job_type: &JobType) -> Arc<Lane> {
        if let Some(lane) = self.lane(job_type) {
            return lane;
        }
        let mut lanes = self
            .inner
            .lanes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            lanes
                .entry(job_type.clone())
                .or_insert_with(|| Arc::new(Lane::new(job_type.clone()))),
        )
    }

    fn retention_now(&self) -> (DateTime<Utc>, Duration) {
        let shared = &self.inner.shared;
        (shared.clock.now(), shared.config.completed_retention())
    }

    fn collect<'a>(&self, lane: &'a Lane) -> MutexGuard<'a, LaneState> {
        let (now, retention) = self.retention_now();
        lane.lock_collected(now, retention)
    }

    fn lanes(&self) -> Vec<Arc<Lane>> {
        self.inner
            .lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessorError;
    use crate::ports::ManualClock;
    use crate::typed::{JobContext, processor_fn};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::{Barrier, Notify};

    const MAIL: &str = "school.mail.send.v1";
    const REPORT: &str = "school.report.generate.v1";

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SendMail {
        to: String,
    }

    impl JobPayload for SendMail {
        const TYPE: &'static str = MAIL;
    }

    struct SendMailProcessor {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Processor<SendMail> for SendMailProcessor {
        async fn process(&self, job: JobContext<SendMail>) -> Result<(), ProcessorError> {
            self.sent.lock().unwrap().push(job.payload.to);
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
    }

    fn service(clock: &ManualClock) -> QueueService {
        let config = QueueConfig {
            poll_interval_ms: 10,
            ..QueueConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        QueueService::from_parts(
            config.clone(),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
            Arc::new(DefaultDecider::new(config.retry_policy())),
        )
    }

    fn mail() -> JobType {
        JobType::new(MAIL)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn status_of(service: &QueueService, id: JobId) -> Option<JobStatus> {
        service.job_status(id).map(|job| job.status)
    }

    /// Let a few polling periods pass.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn typed_job_runs_to_completion() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let sent = Arc::new(Mutex::new(Vec::new()));
        service
            .register::<SendMail, _>(SendMailProcessor {
                sent: Arc::clone(&sent),
            })
            .unwrap();

        let id = service
            .enqueue(
                &SendMail {
                    to: "parent@example.com".to_string(),
                },
                EnqueueOptions::new(),
            )
            .unwrap();
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;

        let job = service.job_status(id).unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.completed_at, Some(t0()));
        assert_eq!(*sent.lock().unwrap(), vec!["parent@example.com".to_string()]);

        let stats = service.stats(&mail()).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed, 1);
        assert!(!stats.is_busy);
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_failed() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProcessorError::failed("smtp unavailable")) }
                }),
            )
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new().max_attempts(2));
        wait_for(|| status_of(&service, id) == Some(JobStatus::Retrying)).await;

        let job = service.job_status(id).unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("smtp unavailable"));
        assert_eq!(job.scheduled_at, t0() + chrono::Duration::seconds(2));

        settle().await;
        assert_eq!(service.job_status(id).unwrap().attempts, 1);

        clock.advance(Duration::from_secs(2));
        wait_for(|| status_of(&service, id) == Some(JobStatus::Failed)).await;

        let job = service.job_status(id).unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.failed_at, Some(t0() + chrono::Duration::seconds(2)));

        clock.advance(Duration::from_secs(3600));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.stats(&mail()).unwrap().failed, 1);
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let low = service.enqueue_json(MAIL, serde_json::json!({"n": 1}), EnqueueOptions::new());
        let high = service.enqueue_json(MAIL, serde_json::json!({"n": 2}), EnqueueOptions::new().priority(5));
        assert_eq!(
            service.list_jobs(&mail()).iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![high, low]
        );

        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        service
            .register_dyn(
                MAIL,
                processor_fn(move |job| {
                    sink.lock().unwrap().push(job.id);
                    async { Ok(()) }
                }),
            )
            .unwrap();

        wait_for(|| status_of(&service, low) == Some(JobStatus::Completed)).await;
        assert_eq!(*order.lock().unwrap(), vec![high, low]);
    }

    #[tokio::test]
    async fn delayed_job_waits_for_its_time() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(
            MAIL,
            serde_json::json!({}),
            EnqueueOptions::new().delay(Duration::from_secs(5)),
        );
        settle().await;
        let job = service.job_status(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        clock.advance(Duration::from_secs(5));
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
    }

    #[tokio::test]
    async fn removed_job_is_never_dispatched() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        // paused so the job cannot be picked up before it is removed
        service.pause_queue(&mail());
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
            )
            .unwrap();
        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());

        assert!(service.remove_job(id));
        assert!(service.job_status(id).is_none());
        assert!(!service.remove_job(id));

        service.resume_queue(&mail()).unwrap();
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.stats(&mail()).unwrap().total, 0);

        // the lane is live: a later job does run
        let next = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, next) == Some(JobStatus::Completed)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn processing_job_cannot_be_removed() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Processing)).await;
        assert!(service.stats(&mail()).unwrap().is_busy);
        assert!(!service.remove_job(id));

        release.notify_one();
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
        assert!(service.remove_job(id));
    }

    #[tokio::test]
    async fn one_job_in_flight_per_type() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let (now, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    let (now, max) = (Arc::clone(&now), Arc::clone(&max));
                    async move {
                        let running = now.fetch_add(1, Ordering::SeqCst) + 1;
                        max.fetch_max(running, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        now.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let ids: Vec<JobId> = (0..4)
            .map(|_| service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new()))
            .collect();
        wait_for(|| service.stats(&mail()).unwrap().completed == ids.len()).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_types_run_concurrently() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        // both processors must be in flight at the same time to pass the barrier
        let barrier = Arc::new(Barrier::new(2));
        for job_type in [MAIL, REPORT] {
            let barrier = Arc::clone(&barrier);
            service
                .register_dyn(
                    job_type,
                    processor_fn(move |_job| {
                        let barrier = Arc::clone(&barrier);
                        async move {
                            barrier.wait().await;
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        let a = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        let b = service.enqueue_json(REPORT, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| {
            status_of(&service, a) == Some(JobStatus::Completed)
                && status_of(&service, b) == Some(JobStatus::Completed)
        })
        .await;
    }

    #[tokio::test]
    async fn completed_job_is_not_run_again() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
            )
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;

        clock.advance(Duration::from_secs(30));
        settle().await;
        let job = service.job_status(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_type_accumulates_pending() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service.enqueue_json("school.sync.roster.v1", serde_json::json!({}), EnqueueOptions::new());
        service.enqueue_json("school.sync.roster.v1", serde_json::json!({}), EnqueueOptions::new());
        settle().await;

        let stats = service.stats(&JobType::new("school.sync.roster.v1")).unwrap();
        assert_eq!(stats.pending, 2);
        assert!(service.registered_types().is_empty());
    }

    #[tokio::test]
    async fn pause_holds_jobs_until_resume() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        service.pause_queue(&mail());
        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        settle().await;
        assert_eq!(status_of(&service, id), Some(JobStatus::Pending));
        assert!(service.stats(&mail()).unwrap().is_paused);

        service.resume_queue(&mail()).unwrap();
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
        assert!(!service.stats(&mail()).unwrap().is_paused);
    }

    #[tokio::test]
    async fn pause_lets_in_flight_job_finish() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        service
            .register_dyn(
                MAIL,
                processor_fn(move |_job| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let running = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, running) == Some(JobStatus::Processing)).await;
        let waiting = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());

        service.pause_queue(&mail());
        release.notify_one();
        wait_for(|| status_of(&service, running) == Some(JobStatus::Completed)).await;
        settle().await;
        assert_eq!(status_of(&service, waiting), Some(JobStatus::Pending));

        service.resume_queue(&mail()).unwrap();
        release.notify_one();
        wait_for(|| status_of(&service, waiting) == Some(JobStatus::Completed)).await;
    }

    #[tokio::test]
    async fn registering_a_paused_type_waits_for_resume() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service.pause_queue(&mail());
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        settle().await;
        assert_eq!(status_of(&service, id), Some(JobStatus::Pending));

        service.resume_queue(&mail()).unwrap();
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
    }

    #[tokio::test]
    async fn re_registering_replaces_processor() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(
                MAIL,
                processor_fn(|_job| async { Err(ProcessorError::failed("old processor")) }),
            )
            .unwrap();
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
        assert_eq!(service.registered_types(), vec![mail()]);
    }

    #[tokio::test]
    async fn completed_jobs_are_collected_after_retention() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;

        clock.advance(Duration::from_secs(60));
        wait_for(|| service.job_status(id).is_none()).await;
    }

    #[tokio::test]
    async fn paused_queue_still_collects_completed_jobs() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;

        service.pause_queue(&mail());
        clock.advance(Duration::from_secs(59));
        assert_eq!(service.stats(&mail()).unwrap().completed, 1);

        clock.advance(Duration::from_secs(1));
        assert!(service.job_status(id).is_none());
        assert!(service.list_jobs(&mail()).is_empty());
        assert_eq!(service.stats(&mail()).unwrap().total, 0);
    }

    #[tokio::test]
    async fn shut_down_service_still_collects_completed_jobs() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        wait_for(|| status_of(&service, id) == Some(JobStatus::Completed)).await;
        service.shutdown().await;

        clock.advance(Duration::from_secs(3600));
        assert!(service.job_status(id).is_none());
    }

    #[tokio::test]
    async fn failed_jobs_stay_until_cleared() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(
                MAIL,
                processor_fn(|_job| async { Err(ProcessorError::failed("bounced")) }),
            )
            .unwrap();

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new().max_attempts(1));
        wait_for(|| status_of(&service, id) == Some(JobStatus::Failed)).await;

        clock.advance(Duration::from_secs(3600));
        settle().await;
        assert_eq!(status_of(&service, id), Some(JobStatus::Failed));

        assert_eq!(service.clear_queue(&mail()), 1);
        assert!(service.job_status(id).is_none());
        assert_eq!(service.clear_queue(&mail()), 0);
    }

    #[tokio::test]
    async fn unknown_lookups_are_empty() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let unknown = JobType::new("school.unknown.v1");

        assert!(service.stats(&unknown).is_none());
        assert!(service.list_jobs(&unknown).is_empty());
        assert_eq!(service.clear_queue(&unknown), 0);
        assert!(service.job_status(JobId::from_ulid(ulid::Ulid::new())).is_none());
        assert!(service.resume_queue(&unknown).is_ok());
    }

    #[tokio::test]
    async fn all_stats_covers_every_type() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        service.enqueue_json(REPORT, serde_json::json!({}), EnqueueOptions::new());
        service.enqueue_json(REPORT, serde_json::json!({}), EnqueueOptions::new());

        let all = service.all_stats();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&mail()].pending, 1);
        assert_eq!(all[&JobType::new(REPORT)].pending, 2);
    }

    #[tokio::test]
    async fn default_max_attempts_comes_from_config() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        assert_eq!(service.job_status(id).unwrap().max_attempts, 3);

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new().max_attempts(0));
        assert_eq!(service.job_status(id).unwrap().max_attempts, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_dispatching() {
        let clock = ManualClock::new(t0());
        let service = service(&clock);
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();
        service.shutdown().await;

        let id = service.enqueue_json(MAIL, serde_json::json!({}), EnqueueOptions::new());
        settle().await;
        assert_eq!(status_of(&service, id), Some(JobStatus::Pending));
    }

    #[test]
    fn register_outside_runtime_fails() {
        let service = QueueService::new(QueueConfig::default()).unwrap();
        let err = service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, HeraldError::NoRuntime(_)));
        assert!(service.registered_types().is_empty());
    }

    #[test]
    fn failed_resume_keeps_queue_paused() {
        let service = QueueService::new(QueueConfig::default()).unwrap();
        service.pause_queue(&mail());
        // paused: registering stores the processor without starting a dispatcher
        service
            .register_dyn(MAIL, processor_fn(|_job| async { Ok(()) }))
            .unwrap();

        let err = service.resume_queue(&mail()).unwrap_err();
        assert!(matches!(err, HeraldError::NoRuntime(_)));
        assert!(service.stats(&mail()).unwrap().is_paused);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = QueueConfig {
            poll_interval_ms: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(QueueService::new(config), Err(HeraldError::Config(_))));
    }
}
