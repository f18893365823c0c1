//! Ports - 抽象化レイヤー
//!
//! 時刻と ID 生成を trait で抽象化し、テストで差し替え可能にします。

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
