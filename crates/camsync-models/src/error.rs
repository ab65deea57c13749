//! Model validation errors.

use thiserror::Error;

/// Result type for model validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when a frame or config fails validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Non-finite value in {field}")]
    NonFiniteValue { field: &'static str },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl ModelError {
    /// Create an invalid geometry error.
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry(message.into())
    }

    /// Create an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
