//! Queue configuration.
//!
//! ```toml
//! poll_interval_ms = 500
//! completed_retention_secs = 120
//! default_max_attempts = 5
//! backoff_unit_ms = 1000
//! max_backoff_secs = 300
//! processor_timeout_ms = 30000
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DEFAULT_MAX_ATTEMPTS;
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of the queue service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How often each dispatcher polls its queue.
    pub poll_interval_ms: u64,

    /// How long completed jobs stay visible before being purged.
    pub completed_retention_secs: u64,

    /// Used when `EnqueueOptions::max_attempts` is not set.
    pub default_max_attempts: u32,

    /// Backoff is `backoff_unit_ms * 2^attempts`.
    pub backoff_unit_ms: u64,

    pub max_backoff_secs: Option<u64>,

    /// Per-attempt execution limit. Unset means no limit.
    pub processor_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            completed_retention_secs: 60,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit_ms: 1000,
            max_backoff_secs: None,
            processor_timeout_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.backoff_unit_ms == 0 {
            return Err(ConfigError::Invalid(
                "backoff_unit_ms must be greater than 0".to_string(),
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "default_max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.processor_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "processor_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(Duration::from_millis(self.backoff_unit_ms));
        match self.max_backoff_secs {
            Some(secs) => policy.with_max_delay(Duration::from_secs(secs)),
            None => policy,
        }
    }

    pub fn processor_timeout(&self) -> Option<Duration> {
        self.processor_timeout_ms.map(Duration::from_millis)
    }
}
