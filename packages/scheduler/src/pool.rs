//! Worker pools
//!
//! Each priority queue gets a fixed number of workers. A worker claims the
//! next id from its queue, runs the handler on a separate tokio task and
//! races it against the deadline and the cancellation token. At the
//! deadline the worker records TimedOut and moves on; the handler task is
//! detached, not aborted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::{SchedulerResult, TaskError, TaskResult};
use crate::handler::{ProgressReporter, TaskContext, TaskHandler};
use crate::retry::RetryCoordinator;
use crate::task::{Priority, TaskInstance, TaskStatus, WorkerBinding};

struct ActiveTask {
    priority: Priority,
    worker: usize,
    token: CancellationToken,
    /// Set once the claim succeeded and the row is Running
    bound: bool,
}

/// Cancellation tokens of tasks held by workers, keyed by task id
#[derive(Clone, Default)]
pub(crate) struct ActiveTasks {
    tasks: Arc<DashMap<Uuid, ActiveTask>>,
}

impl ActiveTasks {
    /// Register the token before claiming, so a cancel that races the claim
    /// always finds it
    fn reserve(&self, id: Uuid, priority: Priority, worker: usize, token: CancellationToken) {
        self.tasks.insert(
            id,
            ActiveTask {
                priority,
                worker,
                token,
                bound: false,
            },
        );
    }

    fn bind(&self, id: Uuid) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.bound = true;
        }
    }

    fn release(&self, id: Uuid) {
        self.tasks.remove(&id);
    }

    /// Signal a held task; returns whether one was found
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.tasks.get(&id) {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Running bindings for one queue, ordered by worker slot
    pub fn bindings(&self, priority: Priority) -> Vec<WorkerBinding> {
        let mut bindings: Vec<WorkerBinding> = self
            .tasks
            .iter()
            .filter(|entry| entry.priority == priority && entry.bound)
            .map(|entry| WorkerBinding {
                worker: entry.worker,
                task_id: *entry.key(),
            })
            .collect();
        bindings.sort_by_key(|b| b.worker);
        bindings
    }
}

/// How an attempt ended, before it is mapped onto a terminal status
enum Outcome {
    /// Handler returned (or panicked)
    Returned(TaskResult),
    /// Deadline passed first
    TimedOut,
    /// Cancellation was signalled and the handler ignored it past the grace period
    Abandoned,
}

/// Fixed-size set of workers serving one queue
pub(crate) struct WorkerPool {
    priority: Priority,
    workers: usize,
    shared: Arc<PoolShared>,
}

struct PoolShared {
    dispatcher: Dispatcher,
    retry: RetryCoordinator,
    cancel_grace: Duration,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        priority: Priority,
        workers: usize,
        dispatcher: Dispatcher,
        retry: RetryCoordinator,
        cancel_grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            priority,
            workers,
            shared: Arc::new(PoolShared {
                dispatcher,
                retry,
                cancel_grace,
                shutdown,
            }),
        }
    }

    /// Start every worker on `tracker`
    pub fn spawn(&self, tracker: &TaskTracker) {
        tracing::info!(queue = %self.priority, workers = self.workers, "Starting worker pool");
        let queue = self.shared.dispatcher.queue(self.priority);
        for worker in 0..self.workers {
            // Counted at spawn; the worker detaches when its loop exits
            queue.attach_worker();
            let shared = self.shared.clone();
            tracker.spawn(shared.run(self.priority, worker));
        }
    }
}

impl PoolShared {
    async fn run(self: Arc<Self>, priority: Priority, worker: usize) {
        let queue = self.dispatcher.queue(priority).clone();
        tracing::debug!(queue = %priority, worker, "Worker started");

        while let Some(id) = queue.pop(&self.shutdown).await {
            if let Err(e) = self.process(priority, worker, id).await {
                e.log();
            }
        }

        queue.detach_worker();
        tracing::debug!(queue = %priority, worker, "Worker stopped");
    }

    async fn process(&self, priority: Priority, worker: usize, id: Uuid) -> SchedulerResult<()> {
        // Popped during shutdown: leave the row Queued for recovery
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let token = self.shutdown.child_token();
        let active = self.dispatcher.active();
        active.reserve(id, priority, worker, token.clone());
        let result = self.execute(id, &token).await;
        active.release(id);
        result
    }

    async fn execute(&self, id: Uuid, token: &CancellationToken) -> SchedulerResult<()> {
        let store = self.dispatcher.store().clone();

        let Some(task) = store.claim(id, Utc::now()).await? else {
            tracing::debug!(task_id = %id, "Task no longer queued, skipping");
            return Ok(());
        };
        self.dispatcher.active().bind(id);

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            queue = task.queue_name(),
            attempt = task.attempt,
            "Task started"
        );

        let Some(handler) = self.dispatcher.registry().resolve(&task.task_type) else {
            let error = TaskError::non_retryable(format!(
                "no handler registered for task type {}",
                task.task_type
            ));
            return self.record(&task, Outcome::Returned(Err(error)), token).await;
        };

        let ctx = TaskContext::new(
            task.id,
            task.task_type.clone(),
            task.attempt,
            task.max_attempts,
            task.deadline,
            token.clone(),
            ProgressReporter::new(task.id, store),
        );
        let outcome = self.supervise(handler, ctx, &task, token).await;
        self.record(&task, outcome, token).await
    }

    /// Run the handler and wait for it, the deadline, or cancellation
    async fn supervise(
        &self,
        handler: Arc<dyn TaskHandler>,
        ctx: TaskContext,
        task: &TaskInstance,
        token: &CancellationToken,
    ) -> Outcome {
        let params = task.params.clone();
        let mut handle = tokio::spawn(async move { handler.execute(ctx, params).await });

        let deadline = tokio::time::sleep(task.timeout);
        tokio::pin!(deadline);

        tokio::select! {
            joined = &mut handle => return Outcome::Returned(flatten(joined)),
            _ = &mut deadline => {
                token.cancel();
                return Outcome::TimedOut;
            }
            _ = token.cancelled() => {}
        }

        // Cancelled: give the handler a grace period, bounded by the deadline
        let grace_end = Instant::now()
            .checked_add(self.cancel_grace)
            .map_or(deadline.deadline(), |end| end.min(deadline.deadline()));

        tokio::select! {
            joined = &mut handle => Outcome::Returned(flatten(joined)),
            _ = tokio::time::sleep_until(grace_end) => Outcome::Abandoned,
        }
    }

    /// Write the terminal status and hand failures to the retry coordinator
    async fn record(
        &self,
        task: &TaskInstance,
        outcome: Outcome,
        token: &CancellationToken,
    ) -> SchedulerResult<()> {
        let cancel_reason = if self.shutdown.is_cancelled() {
            "scheduler shutting down"
        } else {
            "cancelled by request"
        };

        let (status, error, failure) = match outcome {
            Outcome::Returned(Ok(())) => (TaskStatus::Succeeded, None, None),
            Outcome::Returned(Err(TaskError::Cancelled)) if !token.is_cancelled() => (
                TaskStatus::Cancelled,
                Some("handler reported cancellation".to_string()),
                None,
            ),
            Outcome::Returned(Err(TaskError::Cancelled)) => {
                (TaskStatus::Cancelled, Some(cancel_reason.to_string()), None)
            }
            Outcome::Returned(Err(e)) if token.is_cancelled() => (
                TaskStatus::Cancelled,
                Some(format!("{}: {}", cancel_reason, e)),
                None,
            ),
            Outcome::Returned(Err(e)) => (TaskStatus::Failed, Some(e.to_string()), Some(e)),
            Outcome::TimedOut => (
                TaskStatus::TimedOut,
                Some(format!("exceeded timeout of {}s", task.timeout.as_secs_f64())),
                None,
            ),
            Outcome::Abandoned => (
                TaskStatus::Cancelled,
                Some(format!("{}: handler did not stop within grace period", cancel_reason)),
                None,
            ),
        };

        let row = self
            .dispatcher
            .store()
            .transition(task.id, status, error, Utc::now())
            .await?;

        let elapsed_ms = row
            .started_at
            .zip(row.completed_at)
            .map(|(start, end)| (end - start).num_milliseconds())
            .unwrap_or_default();

        match row.status {
            TaskStatus::Succeeded => tracing::info!(
                task_id = %row.id,
                task_type = %row.task_type,
                attempt = row.attempt,
                elapsed_ms,
                "Task succeeded"
            ),
            TaskStatus::TimedOut => tracing::warn!(
                task_id = %row.id,
                task_type = %row.task_type,
                attempt = row.attempt,
                elapsed_ms,
                "Task timed out, handler abandoned"
            ),
            TaskStatus::Cancelled => tracing::info!(
                task_id = %row.id,
                task_type = %row.task_type,
                reason = row.error.as_deref().unwrap_or_default(),
                "Task cancelled"
            ),
            _ => tracing::warn!(
                task_id = %row.id,
                task_type = %row.task_type,
                attempt = row.attempt,
                error = row.error.as_deref().unwrap_or_default(),
                "Task failed"
            ),
        }

        if let Some(failure) = failure {
            self.retry.on_failure(&row, &failure);
        }
        Ok(())
    }
}

fn flatten(joined: Result<TaskResult, JoinError>) -> TaskResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(TaskError::Panicked(message))
        }
        Err(_) => Err(TaskError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_only_include_claimed_tasks() {
        let active = ActiveTasks::default();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        active.reserve(a, Priority::High, 1, CancellationToken::new());
        active.reserve(b, Priority::High, 0, CancellationToken::new());
        active.reserve(c, Priority::Background, 0, CancellationToken::new());
        active.bind(a);
        active.bind(b);

        let bindings = active.bindings(Priority::High);
        assert_eq!(
            bindings,
            vec![
                WorkerBinding { worker: 0, task_id: b },
                WorkerBinding { worker: 1, task_id: a },
            ]
        );
        assert!(active.bindings(Priority::Background).is_empty());

        active.release(a);
        assert_eq!(active.bindings(Priority::High).len(), 1);
    }

    #[test]
    fn test_cancel_signals_reserved_token() {
        let active = ActiveTasks::default();
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        active.reserve(id, Priority::Default, 0, token.clone());

        assert!(active.cancel(id));
        assert!(token.is_cancelled());
        assert!(!active.cancel(Uuid::new_v4()));
    }

    async fn explode() -> TaskResult {
        panic!("tmdb client exploded")
    }

    #[tokio::test]
    async fn test_panics_become_retryable_failures() {
        let result = flatten(tokio::spawn(explode()).await);
        assert_eq!(result, Err(TaskError::Panicked("tmdb client exploded".into())));
        assert!(result.unwrap_err().is_retryable());
    }
}
