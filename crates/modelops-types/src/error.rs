//! Error types for the modelops workspace.
//!
//! [`ModelOpsError`] covers failures that can occur before any pipeline
//! work starts: loading and validating configuration, and the I/O and
//! serialization underneath it. It is non-exhaustive to allow future
//! extension without breaking downstream.

use thiserror::Error;

/// Top-level error type for configuration and schema handling.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ModelOpsError {
    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A family key was referenced that the configuration does not define.
    #[error("unknown model family: {0}")]
    UnknownFamily(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModelOpsError>;
