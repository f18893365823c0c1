//! Typed - 型付き Job API
//!
//! # 主要コンポーネント
//! - **JobPayload**: payload 型と job type 名の対応
//! - **Processor / DynProcessor**: 型付き processor と型消去層
//! - **ProcessorRegistry**: job type → processor の対応表

pub mod payload;
pub mod processor;
pub mod registry;

pub use self::payload::JobPayload;
pub use self::processor::{DynProcessor, FnProcessor, JobContext, Processor, TypedProcessor, processor_fn};
pub use self::registry::ProcessorRegistry;
