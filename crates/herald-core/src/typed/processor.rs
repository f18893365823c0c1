//! Processor trait - job を実行する処理の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Processor<T>)
//! - Object-safe trait (DynProcessor)
//! - Type erasure パターン (TypedProcessor<T, P> → DynProcessor)

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::payload::JobPayload;
use crate::domain::{Job, JobId, JobType};
use crate::error::ProcessorError;

/// Read-only view of a job handed to its processor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext<T> {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: T,

    /// 1 on the first attempt, incremented on every retry.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext<serde_json::Value> {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempt: job.attempts,
            max_attempts: job.max_attempts,
        }
    }

    /// Decode the JSON payload into `T`, keeping the rest of the view.
    pub fn decode<T: JobPayload>(self) -> Result<JobContext<T>, ProcessorError> {
        let payload: T = serde_json::from_value(self.payload)?;
        Ok(JobContext {
            id: self.id,
            job_type: self.job_type,
            payload,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
        })
    }
}

impl<T> JobContext<T> {
    /// Is this the last attempt the queue will make?
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Processor は payload 型 T の job を実行する
///
/// # 使用例
/// ```ignore
/// struct SendMailProcessor;
///
/// #[async_trait]
/// impl Processor<SendMail> for SendMailProcessor {
///     async fn process(&self, job: JobContext<SendMail>) -> Result<(), ProcessorError> {
///         transport.send(&job.payload.to, &job.payload.subject).await
///             .map_err(|e| ProcessorError::failed(e.to_string()))
///     }
/// }
/// ```
///
/// A processor may run more than once for the same job (retries), so it
/// must be idempotent.
#[async_trait]
pub trait Processor<T: JobPayload>: Send + Sync {
    async fn process(&self, job: JobContext<T>) -> Result<(), ProcessorError>;
}

/// DynProcessor は object-safe な Processor の抽象化
///
/// `HashMap<JobType, Arc<dyn DynProcessor>>` に格納するための型消去層。
#[async_trait]
pub trait DynProcessor: Send + Sync {
    async fn process_dyn(&self, job: JobContext<serde_json::Value>) -> Result<(), ProcessorError>;
}

/// Adapter that decodes the payload before calling a typed processor.
pub struct TypedProcessor<T: JobPayload, P: Processor<T>> {
    processor: P,
    _marker: PhantomData<fn(T)>,
}

impl<T: JobPayload, P: Processor<T>> TypedProcessor<T, P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: JobPayload, P: Processor<T>> DynProcessor for TypedProcessor<T, P> {
    async fn process_dyn(&self, job: JobContext<serde_json::Value>) -> Result<(), ProcessorError> {
        let job = job.decode::<T>()?;
        self.processor.process(job).await
    }
}

/// Closure-backed processor over the raw JSON payload.
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap an async closure as a processor.
///
/// ```ignore
/// service.register_dyn("school.backup.run.v1", processor_fn(|job| async move {
///     backup::run(&job.payload).await.map_err(ProcessorError::failed)
/// }))?;
/// ```
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(JobContext<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessorError>> + Send + 'static,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> DynProcessor for FnProcessor<F>
where
    F: Fn(JobContext<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessorError>> + Send + 'static,
{
    async fn process_dyn(&self, job: JobContext<serde_json::Value>) -> Result<(), ProcessorError> {
        (self.f)(job).await
    }
}
