//! Error types for the adaptive execution layer
//!
//! The orchestration core raises almost nothing of its own. Engine failures
//! pass through it untouched; the remaining variants belong to configuration,
//! target parsing, report output and the worker pool.

use std::io;
use thiserror::Error;
use tracing::Level;

pub type Result<T> = std::result::Result<T, ScannerError>;

#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ScannerError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A single setting or argument was rejected
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Raised by the probe engine during one of its scan phases
    #[error("Engine failure in {phase}: {message}")]
    Engine { phase: String, message: String },

    #[error("I/O error ({operation}): {message}")]
    Io { operation: String, message: String },

    /// Worker pool or session bookkeeping failed
    #[error("Internal error in {context}: {message}")]
    Internal { context: String, message: String },
}

impl ScannerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget { target: target.into(), reason: reason.into() }
    }

    pub fn engine(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine { phase: phase.into(), message: message.into() }
    }

    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal { context: context.into(), message: message.into() }
    }

    /// Log level an error of this kind is reported at
    pub fn severity(&self) -> Level {
        match self {
            Self::InvalidTarget { .. } => Level::WARN,
            _ => Level::ERROR,
        }
    }
}

impl From<io::Error> for ScannerError {
    fn from(error: io::Error) -> Self {
        Self::Io {
            operation: format!("{:?}", error.kind()),
            message: error.to_string(),
        }
    }
}

/// A shard task that panicked or was cancelled before reporting back
impl From<tokio::task::JoinError> for ScannerError {
    fn from(error: tokio::task::JoinError) -> Self {
        let message = if error.is_panic() {
            "shard worker panicked".to_string()
        } else {
            error.to_string()
        };
        Self::internal("shard worker", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert_eq!(ScannerError::config("bad").severity(), Level::ERROR);
        assert_eq!(ScannerError::engine("do_pings", "socket closed").severity(), Level::ERROR);
        assert_eq!(ScannerError::invalid_target("x", "y").severity(), Level::WARN);
    }

    #[test]
    fn test_display_includes_context() {
        let error = ScannerError::engine("wait_for_responses", "sniffer closed");
        assert_eq!(error.to_string(), "Engine failure in wait_for_responses: sniffer closed");

        let error = ScannerError::validation("worker_count", "must be greater than 0");
        assert_eq!(error.to_string(), "Invalid worker_count: must be greater than 0");
    }

    #[test]
    fn test_io_error_keeps_kind() {
        let error: ScannerError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(
            error,
            ScannerError::Io { ref operation, .. } if operation == "PermissionDenied"
        ));
    }

    #[tokio::test]
    async fn test_panicked_task_maps_to_internal() {
        let handle = tokio::spawn(async { panic!("boom") });
        let error: ScannerError = handle.await.unwrap_err().into();
        assert!(matches!(error, ScannerError::Internal { .. }));
        assert!(error.to_string().contains("panicked"));
    }
}
