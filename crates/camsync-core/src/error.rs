//! Error types for synchronizer operations.

use camsync_models::{ModelError, SourceId};
use thiserror::Error;

/// Result type for synchronizer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors a handler may return from an event callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Non-fatal faults raised inside the synchronizer.
///
/// None of these stop the tick loop; they are reported to sync-error handlers.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Malformed frame {frame_index} from {source_id}: {reason}")]
    MalformedFrame {
        source_id: SourceId,
        frame_index: u64,
        reason: ModelError,
    },

    #[error("{event} handler failed: {message}")]
    HandlerFailed { event: &'static str, message: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] ModelError),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Synchronizer runtime stopped")]
    RuntimeStopped,
}

impl SyncError {
    /// Create a malformed frame error.
    pub fn malformed_frame(source_id: SourceId, frame_index: u64, reason: ModelError) -> Self {
        Self::MalformedFrame {
            source_id,
            frame_index,
            reason,
        }
    }

    /// Create a handler failure error.
    pub fn handler_failed(event: &'static str, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            event,
            message: message.into(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::MalformedFrame { .. } => "malformed_frame",
            SyncError::HandlerFailed { .. } => "handler_failed",
            SyncError::InvalidConfig(_) => "invalid_config",
            SyncError::UnknownSource(_) => "unknown_source",
            SyncError::RuntimeStopped => "runtime_stopped",
        }
    }
}
