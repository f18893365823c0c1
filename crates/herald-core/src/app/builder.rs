//! QueueServiceBuilder - queue service の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports の差し替え (Clock, IdGenerator, Decider)

use std::sync::Arc;

use super::service::QueueService;
use crate::config::{ConfigError, QueueConfig};
use crate::domain::{Decider, DefaultDecider, JobType};
use crate::error::HeraldError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::typed::{DynProcessor, JobPayload, Processor, TypedProcessor};

/// QueueServiceBuilder は QueueService を構築
///
/// # 使用例
/// ```ignore
/// let service = QueueServiceBuilder::new()
///     .config(QueueConfig::load("herald.toml")?)
///     .register::<SendMail, _>(SendMailProcessor)
///     .expect_types(&["school.mail.send.v1"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_types() で期待される job type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
///
/// `build()` starts dispatchers, so it must run inside a tokio runtime when
/// any processor is registered.
pub struct QueueServiceBuilder {
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
    processors: Vec<(JobType, Arc<dyn DynProcessor>)>,
    expected_types: Option<Vec<JobType>>,
}

/// BuildError は queue service 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job types: {0:?}. These job types were expected but not registered.")]
    MissingJobTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] HeraldError),
}

impl QueueServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            clock: None,
            ids: None,
            decider: None,
            processors: Vec::new(),
            expected_types: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` on the service clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `DefaultDecider` with the config's retry policy.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn register<T: JobPayload, P: Processor<T> + 'static>(self, processor: P) -> Self {
        self.register_dyn(T::TYPE, TypedProcessor::<T, P>::new(processor))
    }

    pub fn register_dyn<P: DynProcessor + 'static>(
        mut self,
        job_type: impl Into<JobType>,
        processor: P,
    ) -> Self {
        self.processors.push((job_type.into(), Arc::new(processor)));
        self
    }

    /// 期待される job type のリストを設定
    pub fn expect_types(mut self, job_types: &[&str]) -> Self {
        self.expected_types = Some(job_types.iter().copied().map(JobType::new).collect());
        self
    }

    /// # 検証
    /// - config の値が妥当か
    /// - expect_types() で設定された job type が全て登録されているか
    pub fn build(self) -> Result<QueueService, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|job_type| !self.processors.iter().any(|(t, _)| t == *job_type))
                .map(JobType::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultDecider::new(self.config.retry_policy())));

        let service = QueueService::from_parts(self.config, clock, ids, decider);
        for (job_type, processor) in self.processors {
            service.register_arc(job_type, processor)?;
        }
        Ok(service)
    }
}

impl Default for QueueServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
