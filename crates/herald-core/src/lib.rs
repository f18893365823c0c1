//! herald-core
//!
//! In-process background job queue: per-type priority queues, one
//! dispatcher per job type with a single job in flight, exponential
//! backoff retries.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job_type, job, status, outcome, decision）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator）
//! - **queue**: type queue の並び順、retry policy、統計
//! - **typed**: 型付き Job API（JobPayload, Processor, ProcessorRegistry）
//! - **app**: QueueService / QueueServiceBuilder と dispatcher
//! - **config**: QueueConfig（TOML）
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{BuildError, QueueService, QueueServiceBuilder};
pub use config::{ConfigError, QueueConfig};
pub use domain::{EnqueueOptions, Job, JobId, JobStatus, JobType};
pub use error::{HeraldError, ProcessorError};
pub use queue::QueueStats;
pub use typed::{DynProcessor, JobContext, JobPayload, Processor, processor_fn};
