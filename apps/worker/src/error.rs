//! Error handling for the Reel worker
//!
//! Built-in jobs fail with [`WorkerError`]; the conversion into
//! [`TaskError`] decides whether the scheduler retries the attempt.

use reel_scheduler::{ErrorSeverity, Priority, SchedulerError, TaskError};
use thiserror::Error;

/// Main worker error type
#[derive(Error, Debug)]
pub enum WorkerError {
    // ========== Job Processing Errors ==========
    /// Job parameters could not be parsed
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A queue has no live workers, so its backlog can never drain
    #[error("{queue} queue has no live workers")]
    NoLiveWorkers { queue: Priority },

    // ========== Scheduler Errors ==========
    /// Scheduler or task store operation failed
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    // ========== Configuration Errors ==========
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WorkerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Scheduler(e) => matches!(e, SchedulerError::Store(_) | SchedulerError::QueueFull { .. }),
            _ => false,
        }
    }

    /// Get a severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::NoLiveWorkers { .. } => ErrorSeverity::Critical,
            Self::Scheduler(e) => e.severity(),
            Self::InvalidPayload(_) => ErrorSeverity::Warning,
        }
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(error = %self, retryable = self.is_retryable(), "Critical worker error");
            }
            ErrorSeverity::Error => {
                tracing::error!(error = %self, retryable = self.is_retryable(), "Worker error");
            }
            ErrorSeverity::Warning => {
                tracing::warn!(error = %self, retryable = self.is_retryable(), "Worker warning");
            }
            ErrorSeverity::Info => {
                tracing::info!(error = %self, retryable = self.is_retryable(), "Worker info");
            }
        }
    }
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

// ========== Conversion Implementations ==========

impl From<WorkerError> for TaskError {
    fn from(err: WorkerError) -> Self {
        if err.is_retryable() {
            TaskError::retryable(err.to_string())
        } else {
            TaskError::non_retryable(err.to_string())
        }
    }
}
