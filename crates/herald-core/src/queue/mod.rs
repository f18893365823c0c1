//! Queue - per-type job storage and retry timing.

pub mod retry;
pub mod stats;
pub mod type_queue;

pub use self::retry::RetryPolicy;
pub use self::stats::QueueStats;
pub use self::type_queue::TypeQueue;
