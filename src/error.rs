//! Tubedesk Error Types
//!
//! Construction-time errors. Upstream call failures are not raised through
//! this type; see [`crate::client::DispatchError`].

use thiserror::Error;

/// Main error type for tubedesk setup and configuration
#[derive(Debug, Error)]
pub enum TubedeskError {
    /// Configuration errors (unreadable file, invalid JSON, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The key file could not be written back to disk
    #[error("Failed to persist key file {path}: {message}")]
    Persist { path: String, message: String },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TubedeskError {
    fn from(err: serde_json::Error) -> Self {
        TubedeskError::Config(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for TubedeskError {
    fn from(err: std::io::Error) -> Self {
        TubedeskError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for tubedesk operations
pub type Result<T> = std::result::Result<T, TubedeskError>;
