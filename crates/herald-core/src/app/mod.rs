//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **QueueServiceBuilder**: queue service の構築とワイヤリング
//! - **QueueService**: enqueue / 状態参照 / pause / resume などの公開 API
//! - **Dispatcher**: job type ごとの実行ループ（next_ready→process→decide→record）

mod dispatcher;
mod lane;

pub mod builder;
pub mod service;

pub use self::builder::{BuildError, QueueServiceBuilder};
pub use self::service::QueueService;
