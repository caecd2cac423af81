//! Error types for the control layer
use thiserror::Error;

/// Control layer errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// DMX device error
    #[error("DMX error: {0}")]
    DmxError(String),

    /// LED strip transport error
    #[error("LED strip error: {0}")]
    StripError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Control target not found
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Invalid message format
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Error raised by the engine core
    #[error(transparent)]
    Core(#[from] stagelight_core::CoreError),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
