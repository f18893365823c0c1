//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff for failed jobs.
///
/// `delay = unit * 2^attempts`, optionally capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Scale of the backoff; with the default of 1s the delays are 2s, 4s, 8s, ...
    pub unit: Duration,

    /// Upper bound for a single delay. `None` keeps the growth unbounded.
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(unit: Duration) -> Self {
        Self {
            unit,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Calculate the delay before the next attempt.
    ///
    /// `attempts` is the number of attempts already made (1 after the first failure).
    /// Saturates instead of overflowing for absurd attempt counts.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let delay = 2u32
            .checked_pow(attempts)
            .and_then(|factor| self.unit.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
