//! Public entry point for submitting, querying and cancelling tasks
//!
//! The dispatcher validates a [`TaskRequest`], persists a Queued
//! [`TaskInstance`], and places its id on the queue for its priority. It is a
//! cheap handle (`Arc` inside) shared by the API layer, the schedule trigger,
//! the retry coordinator and the worker pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::pool::ActiveTasks;
use crate::queue::{Admission, QueueSet, TaskQueue};
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;
use crate::task::{Priority, QueueStatus, TaskFilter, TaskInstance, TaskStatus};

/// A submission; unset fields fall back to the task type's registered
/// options, then to the scheduler-wide defaults
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task_type: String,
    pub params: serde_json::Value,
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub schedule_id: Option<Uuid>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            params: serde_json::Value::Null,
            priority: None,
            max_attempts: None,
            timeout: None,
            schedule_id: None,
        }
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Parse a priority name (`high`, `default`, `background`)
    pub fn priority_name(self, name: &str) -> SchedulerResult<Self> {
        Ok(self.priority(name.parse()?))
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn schedule(mut self, schedule_id: Uuid) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }
}

/// Fallbacks applied when neither the request nor the registration sets a value
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmitDefaults {
    pub timeout: Duration,
    pub max_attempts: u32,
}

struct DispatcherInner {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    queues: QueueSet,
    active: ActiveTasks,
    defaults: SubmitDefaults,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        queues: QueueSet,
        active: ActiveTasks,
        defaults: SubmitDefaults,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                registry,
                queues,
                active,
                defaults,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    pub(crate) fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub(crate) fn queue(&self, priority: Priority) -> &Arc<TaskQueue> {
        self.inner.queues.get(priority)
    }

    pub(crate) fn active(&self) -> &ActiveTasks {
        &self.inner.active
    }

    /// Reject all further submissions
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Validate, persist and enqueue a new submission.
    ///
    /// Rejections (`UnknownTaskType`, `QueueFull`, `NotRunning`) happen
    /// before anything is written.
    pub async fn submit(&self, request: TaskRequest) -> SchedulerResult<TaskInstance> {
        if self.is_closed() {
            return Err(SchedulerError::NotRunning);
        }

        let options = self
            .inner
            .registry
            .options(&request.task_type)
            .ok_or_else(|| SchedulerError::UnknownTaskType(request.task_type.clone()))?;

        let priority = request.priority.or(options.priority).unwrap_or_default();
        let max_attempts = request
            .max_attempts
            .or(options.max_attempts)
            .unwrap_or(self.inner.defaults.max_attempts);
        let timeout = request
            .timeout
            .or(options.timeout)
            .unwrap_or(self.inner.defaults.timeout);

        let mut instance =
            TaskInstance::new(request.task_type, request.params, priority, max_attempts, timeout);
        instance.schedule_id = request.schedule_id;

        if let Err(e) = self.enqueue(&instance, Admission::Bounded).await {
            e.log();
            return Err(e);
        }

        tracing::info!(
            task_id = %instance.id,
            task_type = %instance.task_type,
            queue = instance.queue_name(),
            max_attempts = instance.max_attempts,
            "Task submitted"
        );

        Ok(instance)
    }

    /// Persist `instance` and append it to its queue
    pub(crate) async fn enqueue(
        &self,
        instance: &TaskInstance,
        admission: Admission,
    ) -> SchedulerResult<()> {
        let store = &self.inner.store;
        self.queue(instance.priority)
            .enqueue(instance.id, admission, store.save_instance(instance))
            .await
    }

    /// Put an already-persisted Queued row back on its queue (startup recovery)
    pub(crate) async fn readmit(&self, instance: &TaskInstance) -> SchedulerResult<()> {
        self.queue(instance.priority)
            .enqueue(instance.id, Admission::Readmit, async { Ok(()) })
            .await
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<TaskInstance> {
        self.inner
            .store
            .load_instance(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    pub async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<TaskInstance>> {
        self.inner.store.list_instances(filter).await
    }

    /// Cancel a task.
    ///
    /// Terminal tasks are returned unchanged. Queued tasks become Cancelled
    /// immediately and are never handed to a handler. Running tasks receive
    /// their cancellation signal; the returned row stays Running until the
    /// worker records the outcome.
    pub async fn cancel(&self, id: Uuid) -> SchedulerResult<TaskInstance> {
        let current = self.get(id).await?;

        match current.status {
            status if status.is_terminal() => {
                tracing::debug!(task_id = %id, status = %status, "Cancel of finished task ignored");
                Ok(current)
            }
            TaskStatus::Queued => {
                let cancelled = self
                    .inner
                    .store
                    .transition(
                        id,
                        TaskStatus::Cancelled,
                        Some("cancelled before start".to_string()),
                        Utc::now(),
                    )
                    .await;

                match cancelled {
                    Ok(row) => {
                        self.queue(row.priority).remove(id).await;
                        tracing::info!(task_id = %id, task_type = %row.task_type, "Cancelled queued task");
                        Ok(row)
                    }
                    // A worker claimed it between the read and the write
                    Err(SchedulerError::InvalidTransition { .. }) => {
                        self.signal_running(id);
                        self.get(id).await
                    }
                    Err(e) => Err(e),
                }
            }
            _ => {
                self.signal_running(id);
                self.get(id).await
            }
        }
    }

    fn signal_running(&self, id: Uuid) {
        if self.inner.active.cancel(id) {
            tracing::info!(task_id = %id, "Cancellation requested for running task");
        }
    }

    /// Per-queue worker, activity and backlog counts
    pub async fn queue_status(&self) -> Vec<QueueStatus> {
        let mut statuses = Vec::with_capacity(Priority::ALL.len());
        for priority in Priority::ALL {
            let queue = self.queue(priority);
            let bindings = self.inner.active.bindings(priority);
            statuses.push(QueueStatus {
                priority,
                worker_count: queue.live_workers(),
                active_count: bindings.len(),
                queued_count: queue.len().await,
                capacity: queue.capacity(),
                bindings,
            });
        }
        statuses
    }
}
