//! Worker error types.

use camsync_core::SyncError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Line of {len} bytes exceeds the {max} byte limit")]
    LineTooLong { len: usize, max: usize },

    #[error("Synchronizer error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error only affects one input line.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkerError::Decode(_) | WorkerError::LineTooLong { .. })
    }
}
