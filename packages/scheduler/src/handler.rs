//! Task handler capability contract
//!
//! Handlers receive a [`TaskContext`] carrying the cancellation signal, the
//! deadline, and a progress reporter. Cancellation is cooperative: handlers
//! are expected to check [`TaskContext::is_cancelled`] or select on
//! [`TaskContext::cancelled`] between units of work.
//!
//! The worker reclaims its slot at the deadline whether or not the handler
//! cooperates. An abandoned handler future keeps running in the background,
//! so handler side effects must be idempotent.
//!
//! # Example
//!
//! ```rust,ignore
//! struct RefreshMovie;
//!
//! #[async_trait]
//! impl TaskHandler for RefreshMovie {
//!     async fn execute(&self, ctx: TaskContext, params: serde_json::Value) -> TaskResult {
//!         let ids: Vec<i64> = serde_json::from_value(params)?;
//!         for (i, id) in ids.iter().enumerate() {
//!             ctx.ensure_active()?;
//!             refresh(*id).await?;
//!             ctx.report_progress(percent(i, ids.len()), format!("movie {}", id)).await;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};
use crate::store::TaskStore;

/// Executable capability registered under a task type name
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: TaskContext, params: serde_json::Value) -> TaskResult;
}

/// Writes progress for one attempt back to the store
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Uuid,
    store: Arc<dyn TaskStore>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: Uuid, store: Arc<dyn TaskStore>) -> Self {
        Self { task_id, store }
    }

    /// Fire-and-forget; failures are logged, never surfaced to the handler
    pub async fn report(&self, percent: i32, message: Option<String>) {
        if let Err(e) = self
            .store
            .update_progress(self.task_id, percent, message)
            .await
        {
            tracing::warn!(task_id = %self.task_id, error = %e, "Failed to record progress");
        }
    }
}

/// Per-attempt execution context handed to a handler
#[derive(Clone)]
pub struct TaskContext {
    task_id: Uuid,
    task_type: String,
    attempt: u32,
    max_attempts: u32,
    deadline: Option<DateTime<Utc>>,
    token: CancellationToken,
    progress: ProgressReporter,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: Uuid,
        task_type: String,
        attempt: u32,
        max_attempts: u32,
        deadline: Option<DateTime<Utc>>,
        token: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            task_type,
            attempt,
            max_attempts,
            deadline,
            token,
            progress,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Wall-clock time at which the worker abandons this attempt
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation (user cancel, timeout, or shutdown) is signalled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// `Err(TaskError::Cancelled)` if the signal has fired
    pub fn ensure_active(&self) -> TaskResult {
        if self.token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record progress (clamped to 0-100, never decreasing within the attempt)
    pub async fn report_progress(&self, percent: i32, message: impl Into<String>) {
        self.progress.report(percent, Some(message.into())).await;
    }

    /// Record a percentage without touching the message
    pub async fn report_percent(&self, percent: i32) {
        self.progress.report(percent, None).await;
    }
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext, params: serde_json::Value) -> TaskResult {
        (self.f)(ctx, params).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use crate::task::{Priority, TaskInstance};
    use serde_json::json;
    use std::time::Duration;

    async fn running_context(store: Arc<MemoryTaskStore>) -> (TaskContext, CancellationToken) {
        let task = TaskInstance::new(
            "ImportDownload",
            json!({}),
            Priority::Default,
            2,
            Duration::from_secs(5),
        );
        store.save_instance(&task).await.unwrap();
        let claimed = store.claim(task.id, Utc::now()).await.unwrap().unwrap();
        let token = CancellationToken::new();
        let ctx = TaskContext::new(
            claimed.id,
            claimed.task_type.clone(),
            claimed.attempt,
            claimed.max_attempts,
            claimed.deadline,
            token.clone(),
            ProgressReporter::new(claimed.id, store),
        );
        (ctx, token)
    }

    #[tokio::test]
    async fn test_context_reports_progress() {
        let store = Arc::new(MemoryTaskStore::new());
        let (ctx, _token) = running_context(store.clone()).await;

        ctx.report_progress(25, "moving files").await;
        ctx.report_percent(10).await;

        let row = store.load_instance(ctx.task_id()).await.unwrap().unwrap();
        assert_eq!(row.progress_percent, 25);
        assert_eq!(row.progress_message.as_deref(), Some("moving files"));
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.is_last_attempt());
        assert!(ctx.deadline().is_some());
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let store = Arc::new(MemoryTaskStore::new());
        let (ctx, token) = running_context(store).await;

        assert!(ctx.ensure_active().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.ensure_active(), Err(TaskError::Cancelled));
        // Resolves immediately once cancelled
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_handler_fn_adapter() {
        let store = Arc::new(MemoryTaskStore::new());
        let (ctx, _token) = running_context(store).await;

        let handler = handler_fn(|_ctx, params| async move {
            match params.get("ok").and_then(|v| v.as_bool()) {
                Some(true) => Ok(()),
                _ => Err(TaskError::non_retryable("missing ok flag")),
            }
        });

        assert!(handler.execute(ctx.clone(), json!({ "ok": true })).await.is_ok());
        assert!(handler.execute(ctx, json!({})).await.is_err());
    }
}
