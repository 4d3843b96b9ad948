//! Service error types.

use thiserror::Error;

use modelops_types::ModelOpsError;

/// Errors produced by services in this crate.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A run for the family is already PENDING or RUNNING.
    #[error("family {family} already has an active run: {run_id}")]
    AlreadyRunning {
        /// Family that was triggered.
        family: String,
        /// The run holding the family's active slot.
        run_id: String,
    },

    /// The family is not defined in the configuration.
    #[error("unknown model family: {0}")]
    UnknownFamily(String),

    /// The requested run was not found.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// The requested model version was not found.
    #[error("model version not found: {0}")]
    VersionNotFound(String),

    /// A terminal run was asked to change.
    #[error("run {0} is terminal and cannot be modified")]
    RunTerminal(String),

    /// Metrics were already written for the run with different values.
    #[error("metrics for run {0} are already written and differ")]
    MetricsConflict(String),

    /// No metrics are recorded for the run or version.
    #[error("no metrics recorded for {0}")]
    MetricsNotFound(String),

    /// A cron expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// A version id string was malformed.
    #[error("invalid version id: {0}")]
    InvalidVersionId(String),

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every notification sink failed.
    #[error("notification failed: {0}")]
    NotificationFailed(String),

    /// A background pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),

    /// Configuration error surfaced from `modelops-types`.
    #[error(transparent)]
    Config(#[from] ModelOpsError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ServiceError::AlreadyRunning {
            family: "detector".into(),
            run_id: "run-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "family detector already has an active run: run-1"
        );

        let err = ServiceError::VersionNotFound("detector:v9".into());
        assert_eq!(err.to_string(), "model version not found: detector:v9");

        let err = ServiceError::RunTerminal("run-2".into());
        assert_eq!(
            err.to_string(),
            "run run-2 is terminal and cannot be modified"
        );

        let err = ServiceError::InvalidCronExpression("bad".into());
        assert_eq!(err.to_string(), "invalid cron expression: bad");

        let err = ServiceError::ChannelClosed;
        assert_eq!(err.to_string(), "channel closed");
    }

    #[test]
    fn config_errors_pass_through() {
        let err: ServiceError = ModelOpsError::UnknownFamily("x".into()).into();
        assert_eq!(err.to_string(), "unknown model family: x");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ServiceError = io_err.into();
        assert!(matches!(err, ServiceError::Io(_)));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: ServiceError = json_err.into();
        assert!(matches!(err, ServiceError::Json(_)));
    }
}
