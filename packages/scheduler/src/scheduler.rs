//! Scheduler lifecycle
//!
//! [`Scheduler`] wires the store, registry, queues, pools, retry coordinator
//! and schedule trigger together. Each instance is independent; tests build
//! a fresh one per case.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use reel_shared_config::SchedulerConfig;

use crate::dispatcher::{Dispatcher, SubmitDefaults, TaskRequest};
use crate::error::{SchedulerError, SchedulerResult, TaskError};
use crate::pool::{ActiveTasks, WorkerPool};
use crate::queue::QueueSet;
use crate::registry::HandlerRegistry;
use crate::retry::{RetryCoordinator, RetryPolicy};
use crate::schedule::ScheduledTask;
use crate::store::{MemoryTaskStore, TaskStore};
use crate::task::{Priority, QueueStatus, TaskFilter, TaskInstance, TaskStatus};
use crate::trigger::ScheduleTrigger;

const INTERRUPTED: &str = "interrupted by scheduler restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    registry: Option<Arc<HandlerRegistry>>,
}

impl SchedulerBuilder {
    /// Use `store` instead of a fresh in-memory store
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a pre-populated registry
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> SchedulerResult<Scheduler> {
        self.config.validate()?;

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryTaskStore::new()),
        };
        let registry = self.registry.unwrap_or_default();
        let config = self.config;

        let dispatcher = Dispatcher::new(
            store,
            registry,
            QueueSet::new(&config.high, &config.default, &config.background),
            ActiveTasks::default(),
            SubmitDefaults {
                timeout: config.default_timeout,
                max_attempts: config.retry.max_attempts,
            },
        );

        let shutdown = CancellationToken::new();
        let timers = TaskTracker::new();
        let retry = RetryCoordinator::new(
            dispatcher.clone(),
            RetryPolicy::new(config.retry),
            shutdown.clone(),
            timers.clone(),
        );
        let trigger = ScheduleTrigger::new(dispatcher.clone(), config.tick_interval);

        Ok(Scheduler {
            config,
            dispatcher,
            retry,
            trigger,
            shutdown,
            workers: TaskTracker::new(),
            timers,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }
}

/// Background task scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    dispatcher: Dispatcher,
    retry: RetryCoordinator,
    trigger: ScheduleTrigger,
    shutdown: CancellationToken,
    /// Pool workers and the trigger loop
    workers: TaskTracker,
    /// Pending retry timers
    timers: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            store: None,
            registry: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn trigger(&self) -> &ScheduleTrigger {
        &self.trigger
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        self.dispatcher.store()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.dispatcher.registry()
    }

    pub async fn is_running(&self) -> bool {
        *self.lifecycle.lock().await == Lifecycle::Running
    }

    /// Recover persisted work, then start the pools and the trigger loop
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running => return Err(SchedulerError::AlreadyRunning),
            Lifecycle::Stopped => return Err(SchedulerError::NotRunning),
            Lifecycle::Created => {}
        }

        self.recover().await?;

        for priority in Priority::ALL {
            let queue = match priority {
                Priority::High => &self.config.high,
                Priority::Default => &self.config.default,
                Priority::Background => &self.config.background,
            };
            WorkerPool::new(
                priority,
                queue.workers,
                self.dispatcher.clone(),
                self.retry.clone(),
                self.config.cancel_grace,
                self.shutdown.clone(),
            )
            .spawn(&self.workers);
        }
        self.workers
            .spawn(self.trigger.clone().run(self.shutdown.clone()));

        *lifecycle = Lifecycle::Running;
        tracing::info!(
            high = self.config.high.workers,
            default = self.config.default.workers,
            background = self.config.background.workers,
            task_types = ?self.registry().task_types(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Best-effort recovery of rows left behind by a previous run.
    ///
    /// Queued rows go back on their queue in creation order. Running rows
    /// lost their worker: they are failed and handed to the retry
    /// coordinator like any retryable failure.
    async fn recover(&self) -> SchedulerResult<()> {
        let store = self.store();

        let mut requeued = 0;
        let queued = store
            .list_instances(&TaskFilter::new().status(TaskStatus::Queued))
            .await?;
        for priority in Priority::ALL {
            let already = self.dispatcher.queue(priority).snapshot().await;
            for instance in queued
                .iter()
                .filter(|t| t.priority == priority && !already.contains(&t.id))
            {
                self.dispatcher.readmit(instance).await?;
                requeued += 1;
            }
        }

        let running = store
            .list_instances(&TaskFilter::new().status(TaskStatus::Running))
            .await?;
        let interrupted = running.len();
        for instance in running {
            let row = store
                .transition(
                    instance.id,
                    TaskStatus::Failed,
                    Some(INTERRUPTED.to_string()),
                    Utc::now(),
                )
                .await?;
            self.retry.on_failure(&row, &TaskError::retryable(INTERRUPTED));
        }

        if requeued > 0 || interrupted > 0 {
            tracing::info!(requeued, interrupted, "Recovered tasks from store");
        }
        Ok(())
    }

    /// Stop accepting work, signal running handlers, and wait for the pools
    /// to drain (bounded by `shutdown_timeout`).
    ///
    /// Queued rows stay Queued in the store.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle == Lifecycle::Stopped {
            return Ok(());
        }

        tracing::info!("Stopping scheduler");
        self.dispatcher.close();
        self.shutdown.cancel();
        self.workers.close();
        self.timers.close();

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            self.workers.wait().await;
            self.timers.wait().await;
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Workers did not drain before shutdown timeout"
            );
        }

        *lifecycle = Lifecycle::Stopped;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    // ========== Dispatcher ==========

    pub async fn submit(&self, request: TaskRequest) -> SchedulerResult<TaskInstance> {
        self.dispatcher.submit(request).await
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<TaskInstance> {
        self.dispatcher.get(id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<TaskInstance>> {
        self.dispatcher.list(filter).await
    }

    pub async fn cancel(&self, id: Uuid) -> SchedulerResult<TaskInstance> {
        self.dispatcher.cancel(id).await
    }

    pub async fn queue_status(&self) -> Vec<QueueStatus> {
        self.dispatcher.queue_status().await
    }

    // ========== Schedules ==========

    pub async fn upsert_schedule(&self, schedule: ScheduledTask) -> SchedulerResult<ScheduledTask> {
        self.trigger.upsert(schedule).await
    }

    pub async fn remove_schedule(&self, id: Uuid) -> SchedulerResult<()> {
        self.trigger.remove(id).await
    }

    pub async fn set_schedule_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> SchedulerResult<ScheduledTask> {
        self.trigger.set_enabled(id, enabled).await
    }

    pub async fn list_schedules(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.trigger.list().await
    }

    pub async fn run_schedule_now(&self, id: Uuid) -> SchedulerResult<Option<TaskInstance>> {
        self.trigger.run_now(id).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Detached workers would otherwise wait on their queues forever
        self.shutdown.cancel();
    }
}
