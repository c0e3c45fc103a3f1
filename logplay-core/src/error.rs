//! Error types for replay operations

use crate::transport::DecodeError;

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Error types for the replay engine
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// A caller-supplied value is out of range or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Log index construction or session setup failed
    #[error("Setup error: {0}")]
    Setup(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Sample decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ReplayError {
    /// Shorthand for an [`ReplayError::InvalidArgument`]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ReplayError::InvalidArgument(msg.into())
    }

    /// Shorthand for an [`ReplayError::InvalidState`]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ReplayError::InvalidState(msg.into())
    }
}

impl From<String> for ReplayError {
    fn from(s: String) -> Self {
        ReplayError::Other(s)
    }
}

impl From<&str> for ReplayError {
    fn from(s: &str) -> Self {
        ReplayError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ReplayError {
    fn from(err: anyhow::Error) -> Self {
        ReplayError::Other(err.to_string())
    }
}

impl From<figment::Error> for ReplayError {
    fn from(err: figment::Error) -> Self {
        ReplayError::Configuration(format!("Failed to load configuration: {}", err))
    }
}
