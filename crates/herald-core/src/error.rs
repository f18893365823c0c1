use thiserror::Error;

use crate::config::ConfigError;

/// Error a processor returns for a failed attempt.
///
/// Every variant is treated as a retryable failure by the queue; the
/// message ends up in `Job::error`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("failed to encode payload for job_type={job_type}: {source}")]
    PayloadEncode {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no tokio runtime available to start the dispatcher for job_type={0}")]
    NoRuntime(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
