//! Error types for the task scheduler
//!
//! `SchedulerError` covers everything the engine itself can reject or fail
//! on. `TaskError` is what a handler returns; it decides whether the retry
//! chain continues.

use thiserror::Error;
use uuid::Uuid;

use reel_shared_config::ConfigError;

use crate::task::{Priority, TaskStatus};

/// Main scheduler error type
#[derive(Error, Debug)]
pub enum SchedulerError {
    // ========== Submission Errors ==========
    /// No handler is registered under this task type
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// Priority could not be parsed
    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    /// Queue backlog is at capacity
    #[error("{queue} queue is full (capacity {capacity})")]
    QueueFull { queue: Priority, capacity: usize },

    // ========== Lookup Errors ==========
    /// Task instance does not exist
    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// Scheduled task does not exist
    #[error("schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// Schedule definition is malformed (bad cron expression, zero interval)
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    // ========== State Machine Errors ==========
    /// Requested status change is not a legal transition
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    // ========== Lifecycle Errors ==========
    /// Scheduler has been stopped
    #[error("scheduler is not running")]
    NotRunning,

    /// `start()` was called twice
    #[error("scheduler is already running")]
    AlreadyRunning,

    // ========== Storage Errors ==========
    /// Task store operation failed
    #[error("task store error: {0}")]
    Store(String),

    // ========== Configuration Errors ==========
    /// Configuration rejected at build time
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl SchedulerError {
    /// Whether Submit rejected the request synchronously (nothing was created)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownTaskType(_)
                | Self::InvalidPriority(_)
                | Self::QueueFull { .. }
                | Self::NotRunning
        )
    }

    /// Whether the caller may succeed by submitting again later
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Get a severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::Store(_) => ErrorSeverity::Critical,
            Self::InvalidTransition { .. } | Self::AlreadyRunning => ErrorSeverity::Error,
            Self::QueueFull { .. } | Self::NotRunning | Self::InvalidSchedule(_) => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Info,
        }
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(error = %self, "Critical scheduler error");
            }
            ErrorSeverity::Error => {
                tracing::error!(error = %self, "Scheduler error");
            }
            ErrorSeverity::Warning => {
                tracing::warn!(error = %self, "Scheduler warning");
            }
            ErrorSeverity::Info => {
                tracing::info!(error = %self, "Scheduler info");
            }
        }
    }

    /// Create a store error from any displayable cause
    pub fn store(cause: impl std::fmt::Display) -> Self {
        Self::Store(cause.to_string())
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that should trigger alerts
    Critical,
    /// Standard errors
    Error,
    /// Warnings for expected failures
    Warning,
    /// Informational messages
    Info,
}

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Failure returned by a task handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; the retry chain continues if attempts remain
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure (invalid input, missing resource); ends the chain
    #[error("{0}")]
    NonRetryable(String),

    /// Handler observed its cancellation signal and stopped
    #[error("cancelled")]
    Cancelled,

    /// Handler task panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable(message.into())
    }

    /// Check if this error should feed the retry coordinator
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Panicked(_))
    }
}

/// Result type alias for handler executions
pub type TaskResult<T = ()> = Result<T, TaskError>;

// ========== Conversion Implementations ==========

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to TaskError first
        match err.downcast::<TaskError>() {
            Ok(task_err) => task_err,
            Err(err) => Self::Retryable(format!("{:#}", err)),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::NonRetryable(format!("invalid task params: {}", err))
    }
}

impl From<SchedulerError> for TaskError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Store(_) | SchedulerError::QueueFull { .. } => {
                Self::Retryable(err.to_string())
            }
            _ => Self::NonRetryable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections() {
        assert!(SchedulerError::UnknownTaskType("RefreshMovie".into()).is_rejection());
        assert!(SchedulerError::QueueFull {
            queue: Priority::High,
            capacity: 10
        }
        .is_rejection());
        assert!(!SchedulerError::NotFound(Uuid::new_v4()).is_rejection());
        assert!(!SchedulerError::store("disk full").is_rejection());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(
            SchedulerError::store("connection reset").severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            SchedulerError::QueueFull {
                queue: Priority::Background,
                capacity: 1
            }
            .severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(
            SchedulerError::NotFound(Uuid::nil()).severity(),
            ErrorSeverity::Info
        );
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::QueueFull {
            queue: Priority::Default,
            capacity: 100,
        };
        assert_eq!(err.to_string(), "default queue is full (capacity 100)");

        let err = SchedulerError::InvalidTransition {
            id: Uuid::nil(),
            from: TaskStatus::Succeeded,
            to: TaskStatus::Running,
        };
        assert!(err.to_string().ends_with("Succeeded -> Running"));
    }

    #[test]
    fn test_task_error_retryability() {
        assert!(TaskError::retryable("indexer timeout").is_retryable());
        assert!(TaskError::Panicked("boom".into()).is_retryable());
        assert!(!TaskError::non_retryable("bad tmdb id").is_retryable());
        assert!(!TaskError::Cancelled.is_retryable());
    }

    #[test]
    fn test_task_error_conversions() {
        let err: TaskError = anyhow::anyhow!("connection refused").into();
        assert_eq!(err, TaskError::Retryable("connection refused".into()));

        let err: TaskError = anyhow::Error::new(TaskError::non_retryable("nope")).into();
        assert_eq!(err, TaskError::NonRetryable("nope".into()));

        let parse = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err: TaskError = parse.into();
        assert!(!err.is_retryable());
    }
}
