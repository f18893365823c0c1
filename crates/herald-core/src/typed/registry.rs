//! ProcessorRegistry - Processor の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権 (dispatcher は dispatch 毎に lookup する)

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::payload::JobPayload;
use super::processor::{DynProcessor, Processor, TypedProcessor};
use crate::domain::JobType;

/// ProcessorRegistry は job type ごとの Processor を保持
///
/// # 使用例
/// ```ignore
/// let registry = ProcessorRegistry::new();
/// registry.register::<SendMail, _>(SendMailProcessor);
///
/// let processor = registry.get(&JobType::new(SendMail::TYPE));
/// ```
///
/// 二重登録はエラーではなく置き換え。dispatcher は次の dispatch から
/// 新しい processor を使う。
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<JobType, Arc<dyn DynProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a previous processor was replaced.
    pub fn register<T: JobPayload, P: Processor<T> + 'static>(&self, processor: P) -> bool {
        self.register_dyn(
            JobType::new(T::TYPE),
            Arc::new(TypedProcessor::<T, P>::new(processor)),
        )
    }

    /// Returns `true` if a previous processor was replaced.
    pub fn register_dyn(&self, job_type: JobType, processor: Arc<dyn DynProcessor>) -> bool {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type, processor)
            .is_some()
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn DynProcessor>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_type)
    }

    /// Sorted, so callers get a stable listing.
    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}
