use thiserror::Error;

use crate::launch::key::RunKey;
use crate::launch::registry::ExecutionStatus;

/// Unified error type for the launcher.
///
/// Request-time variants (`Validation`, `DuplicateRun`, `AlreadyComplete`,
/// `QueueFull`, `ShuttingDown`) are returned to the launching caller before any
/// background work starts. Job body failures never show up here; they are
/// recorded on the execution record instead.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Malformed run parameters
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// An equivalent run is already pending or running
    #[error("Run {key} is already {status}")]
    DuplicateRun { key: RunKey, status: ExecutionStatus },

    /// The run completed and the rerun policy forbids launching it again
    #[error("Run {key} already completed and may not be rerun")]
    AlreadyComplete { key: RunKey },

    /// The worker pool queue has no room for another job body
    #[error("Worker queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    /// The worker pool no longer accepts work
    #[error("Launcher is shutting down")]
    ShuttingDown,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LaunchError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a parameter
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// True for errors caused by the request itself rather than launcher capacity.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::DuplicateRun { .. } | Self::AlreadyComplete { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::DuplicateRun { .. } => "duplicate_run",
            Self::AlreadyComplete { .. } => "already_complete",
            Self::QueueFull { .. } => "queue_full",
            Self::ShuttingDown => "shutting_down",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LaunchError>;

impl From<serde_yaml::Error> for LaunchError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid yaml: {}", err))
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("malformed json: {}", err))
    }
}

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: "io operation failed".to_string(),
            source: Some(Box::new(err)),
        }
    }
}
