//! Stage error taxonomy and retry classification.

use std::time::Duration;

use thiserror::Error;

use crate::error::ServiceError;

/// Why one stage attempt failed.
#[derive(Error, Debug)]
pub enum StageError {
    /// Network or infrastructure failure that may clear on its own.
    #[error("transient error: {0}")]
    Transient(String),

    /// Bad configuration or input. Retrying cannot help.
    #[error("validation error: {0}")]
    Validation(String),

    /// The attempt exceeded the stage timeout.
    #[error("stage attempt timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The external job reported failure.
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// An orchestrator store or service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Whether a failed attempt should be retried.
///
/// Transient errors, timeouts and failed external jobs are retried.
/// Validation and internal service errors fail the stage immediately.
pub fn is_retryable(err: &StageError) -> bool {
    match err {
        StageError::Transient(_) | StageError::Timeout(_) | StageError::JobFailed { .. } => true,
        StageError::Validation(_) | StageError::Service(_) => false,
    }
}
