//! Recurring schedule trigger
//!
//! A single loop wakes every `tick_interval`, submits an instance for each
//! enabled schedule whose `next_run_at` has passed, and moves `next_run_at`
//! to the next slot on the schedule's own grid. The trigger never runs
//! handler code itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, TaskRequest};
use crate::error::{SchedulerError, SchedulerResult};
use crate::schedule::{OverlapPolicy, ScheduledTask};
use crate::task::{TaskFilter, TaskInstance};

/// What one evaluation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Instances created, in schedule order
    pub fired: Vec<Uuid>,
    /// Schedules skipped because their previous instance is still active
    pub skipped: Vec<Uuid>,
    /// Schedules whose submission was rejected (queue full, unknown type)
    pub rejected: Vec<Uuid>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty() && self.skipped.is_empty() && self.rejected.is_empty()
    }
}

enum Firing {
    Fired(TaskInstance),
    Skipped,
    Rejected(SchedulerError),
}

#[derive(Clone)]
pub struct ScheduleTrigger {
    dispatcher: Dispatcher,
    tick_interval: Duration,
    /// Serializes ticks and manual runs
    pass: Arc<Mutex<()>>,
}

impl ScheduleTrigger {
    pub(crate) fn new(dispatcher: Dispatcher, tick_interval: Duration) -> Self {
        Self {
            dispatcher,
            tick_interval,
            pass: Arc::new(Mutex::new(())),
        }
    }

    /// Create or replace a schedule definition.
    ///
    /// Replacing keeps the stored `last_run_at` and `last_instance_id`.
    pub async fn upsert(&self, mut schedule: ScheduledTask) -> SchedulerResult<ScheduledTask> {
        schedule.validate()?;
        if !self.dispatcher.registry().contains(&schedule.task_type) {
            return Err(SchedulerError::UnknownTaskType(schedule.task_type));
        }

        let store = self.dispatcher.store();
        if let Some(existing) = store.load_schedule(schedule.id).await? {
            schedule.last_run_at = existing.last_run_at;
            schedule.last_instance_id = existing.last_instance_id;
        }
        store.save_schedule(&schedule).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            name = %schedule.name,
            task_type = %schedule.task_type,
            next_run_at = %schedule.next_run_at,
            "Schedule saved"
        );
        Ok(schedule)
    }

    pub async fn remove(&self, id: Uuid) -> SchedulerResult<()> {
        if self.dispatcher.store().delete_schedule(id).await? {
            tracing::info!(schedule_id = %id, "Schedule removed");
            Ok(())
        } else {
            Err(SchedulerError::ScheduleNotFound(id))
        }
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<ScheduledTask> {
        self.dispatcher
            .store()
            .load_schedule(id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(id))
    }

    pub async fn list(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.dispatcher.store().list_schedules().await
    }

    /// Enable or disable a schedule.
    ///
    /// Enabling moves `next_run_at` to the next future slot, so slots missed
    /// while disabled are not fired.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> SchedulerResult<ScheduledTask> {
        let _pass = self.pass.lock().await;
        let mut schedule = self.get(id).await?;
        if schedule.enabled == enabled {
            return Ok(schedule);
        }
        schedule.enabled = enabled;
        if enabled {
            schedule.next_run_at = schedule.next_run_after(Utc::now())?;
        }
        self.dispatcher.store().save_schedule(&schedule).await?;
        tracing::info!(schedule_id = %id, enabled, "Schedule toggled");
        Ok(schedule)
    }

    /// Fire a schedule immediately, outside its grid.
    ///
    /// The overlap policy still applies: returns `None` when skipped.
    /// `next_run_at` is left unchanged.
    pub async fn run_now(&self, id: Uuid) -> SchedulerResult<Option<TaskInstance>> {
        let _pass = self.pass.lock().await;
        let mut schedule = self.get(id).await?;
        match self.fire(&mut schedule, Utc::now()).await? {
            Firing::Fired(instance) => {
                self.dispatcher.store().save_schedule(&schedule).await?;
                Ok(Some(instance))
            }
            Firing::Skipped => Ok(None),
            Firing::Rejected(e) => Err(e),
        }
    }

    /// Evaluate every enabled schedule against `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        let _pass = self.pass.lock().await;
        let mut report = TickReport::default();

        for mut schedule in self.dispatcher.store().list_schedules().await? {
            if !schedule.is_due(now) {
                continue;
            }
            if let Err(e) = self.evaluate(&mut schedule, now, &mut report).await {
                tracing::error!(
                    schedule_id = %schedule.id,
                    name = %schedule.name,
                    error = %e,
                    "Failed to evaluate schedule"
                );
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                fired = report.fired.len(),
                skipped = report.skipped.len(),
                rejected = report.rejected.len(),
                "Schedule tick evaluated"
            );
        }
        Ok(report)
    }

    async fn evaluate(
        &self,
        schedule: &mut ScheduledTask,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> SchedulerResult<()> {
        // Advance on the schedule's grid whatever the outcome; a schedule
        // with no next slot is disabled instead of firing on every tick
        let next = match schedule.next_run_after(now) {
            Ok(next) => next,
            Err(e) => {
                schedule.enabled = false;
                self.dispatcher.store().save_schedule(schedule).await?;
                return Err(e);
            }
        };

        match self.fire(schedule, now).await? {
            Firing::Fired(instance) => report.fired.push(instance.id),
            Firing::Skipped => report.skipped.push(schedule.id),
            Firing::Rejected(e) => {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    name = %schedule.name,
                    error = %e,
                    "Scheduled firing dropped"
                );
                report.rejected.push(schedule.id);
            }
        }

        schedule.next_run_at = next;
        self.dispatcher.store().save_schedule(schedule).await
    }

    async fn fire(&self, schedule: &mut ScheduledTask, now: DateTime<Utc>) -> SchedulerResult<Firing> {
        if schedule.overlap_policy == OverlapPolicy::Skip && self.has_active_instance(schedule).await? {
            tracing::info!(
                schedule_id = %schedule.id,
                name = %schedule.name,
                "Previous instance still active, skipping firing"
            );
            return Ok(Firing::Skipped);
        }

        let request = TaskRequest::new(schedule.task_type.clone())
            .params(schedule.params.clone())
            .priority(schedule.priority)
            .schedule(schedule.id);

        match self.dispatcher.submit(request).await {
            Ok(instance) => {
                tracing::info!(
                    schedule_id = %schedule.id,
                    name = %schedule.name,
                    task_id = %instance.id,
                    "Schedule fired"
                );
                schedule.last_run_at = Some(now);
                schedule.last_instance_id = Some(instance.id);
                Ok(Firing::Fired(instance))
            }
            Err(e) if e.is_rejection() => Ok(Firing::Rejected(e)),
            Err(e) => Err(e),
        }
    }

    /// Any non-terminal instance from this schedule, retries included
    async fn has_active_instance(&self, schedule: &ScheduledTask) -> SchedulerResult<bool> {
        let instances = self
            .dispatcher
            .list(&TaskFilter::new().schedule(schedule.id))
            .await?;
        Ok(instances.iter().any(|instance| !instance.is_terminal()))
    }

    /// Tick until `shutdown` fires
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_ms = self.tick_interval.as_millis() as u64, "Schedule trigger started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                e.log();
            }
        }

        tracing::info!("Schedule trigger stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::SubmitDefaults;
    use crate::error::TaskResult;
    use crate::handler::{handler_fn, TaskContext, TaskHandler};
    use crate::pool::ActiveTasks;
    use crate::queue::QueueSet;
    use crate::registry::HandlerRegistry;
    use crate::store::{MemoryTaskStore, TaskStore};
    use crate::task::{Priority, TaskStatus};
    use assert_matches::assert_matches;
    use reel_shared_config::QueueConfig;

    fn noop() -> Arc<dyn TaskHandler> {
        handler_fn(|_ctx: TaskContext, _params| async { TaskResult::Ok(()) })
    }

    fn trigger(capacity: usize) -> (ScheduleTrigger, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        let registry = HandlerRegistry::new();
        registry.register("RefreshMonitored", noop);
        let queue = QueueConfig::with_workers(1).capacity(capacity);
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(registry),
            QueueSet::new(&queue, &queue, &queue),
            ActiveTasks::default(),
            SubmitDefaults {
                timeout: Duration::from_secs(60),
                max_attempts: 1,
            },
        );
        (ScheduleTrigger::new(dispatcher, Duration::from_secs(60)), store)
    }

    fn every_five_minutes(anchor: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask::interval("refresh", "RefreshMonitored", Duration::from_secs(300))
            .anchored_at(anchor)
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[tokio::test]
    async fn test_upsert_validates() {
        let (trigger, _) = trigger(10);
        let unknown = ScheduledTask::interval("x", "Nope", Duration::from_secs(60));
        assert_matches!(trigger.upsert(unknown).await, Err(SchedulerError::UnknownTaskType(_)));

        let zero = ScheduledTask::interval("x", "RefreshMonitored", Duration::ZERO);
        assert_matches!(trigger.upsert(zero).await, Err(SchedulerError::InvalidSchedule(_)));

        let huge = ScheduledTask::interval("x", "RefreshMonitored", Duration::from_secs(u64::MAX / 2))
            .with_overlap_policy(OverlapPolicy::Allow);
        assert_matches!(trigger.upsert(huge).await, Err(SchedulerError::InvalidSchedule(_)));

        assert_matches!(
            trigger.remove(Uuid::new_v4()).await,
            Err(SchedulerError::ScheduleNotFound(_))
        );
    }

    #[tokio::test]
    async fn test_tick_fires_only_due_schedules() {
        let (trigger, _) = trigger(10);
        let anchor = Utc::now();
        let schedule = trigger.upsert(every_five_minutes(anchor)).await.unwrap();

        let report = trigger.tick(anchor + minutes(4)).await.unwrap();
        assert!(report.is_empty());

        let report = trigger.tick(anchor + minutes(5)).await.unwrap();
        assert_eq!(report.fired.len(), 1);

        let stored = trigger.get(schedule.id).await.unwrap();
        assert_eq!(stored.last_run_at, Some(anchor + minutes(5)));
        assert_eq!(stored.last_instance_id, Some(report.fired[0]));
        assert_eq!(stored.next_run_at, anchor + minutes(10));

        let instance = trigger.dispatcher.get(report.fired[0]).await.unwrap();
        assert_eq!(instance.schedule_id, Some(schedule.id));
    }

    #[tokio::test]
    async fn test_skip_policy_waits_for_previous_instance() {
        let (trigger, store) = trigger(10);
        let anchor = Utc::now();
        let schedule = trigger.upsert(every_five_minutes(anchor)).await.unwrap();

        let first = trigger.tick(anchor + minutes(5)).await.unwrap().fired[0];
        store.claim(first, Utc::now()).await.unwrap();

        // Still running at +10m: skipped, but the grid still advances
        let report = trigger.tick(anchor + minutes(10)).await.unwrap();
        assert_eq!(report.skipped, vec![schedule.id]);
        let stored = trigger.get(schedule.id).await.unwrap();
        assert_eq!(stored.next_run_at, anchor + minutes(15));
        assert_eq!(stored.last_instance_id, Some(first));

        store
            .transition(first, TaskStatus::Succeeded, None, Utc::now())
            .await
            .unwrap();
        let report = trigger.tick(anchor + minutes(15)).await.unwrap();
        assert_eq!(report.fired.len(), 1);
    }

    #[tokio::test]
    async fn test_allow_policy_overlaps() {
        let (trigger, _) = trigger(10);
        let anchor = Utc::now();
        trigger
            .upsert(every_five_minutes(anchor).with_overlap_policy(OverlapPolicy::Allow))
            .await
            .unwrap();

        trigger.tick(anchor + minutes(5)).await.unwrap();
        let report = trigger.tick(anchor + minutes(10)).await.unwrap();
        assert_eq!(report.fired.len(), 1);
    }

    #[tokio::test]
    async fn test_late_tick_does_not_drift_or_burst() {
        let (trigger, _) = trigger(10);
        let anchor = Utc::now();
        let schedule = trigger
            .upsert(every_five_minutes(anchor).with_overlap_policy(OverlapPolicy::Allow))
            .await
            .unwrap();

        // Loop stalled for 23 minutes: one firing, next slot stays on the grid
        let report = trigger
            .tick(anchor + minutes(23) + chrono::Duration::seconds(7))
            .await
            .unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(
            trigger.get(schedule.id).await.unwrap().next_run_at,
            anchor + minutes(25)
        );
    }

    #[tokio::test]
    async fn test_queue_full_drops_firing_and_advances() {
        let (trigger, _) = trigger(1);
        let anchor = Utc::now();
        let schedule = trigger
            .upsert(every_five_minutes(anchor).with_overlap_policy(OverlapPolicy::Allow))
            .await
            .unwrap();
        trigger.tick(anchor + minutes(5)).await.unwrap();

        let report = trigger.tick(anchor + minutes(10)).await.unwrap();
        assert_eq!(report.rejected, vec![schedule.id]);
        assert_eq!(
            trigger.get(schedule.id).await.unwrap().next_run_at,
            anchor + minutes(15)
        );
    }

    #[tokio::test]
    async fn test_schedule_without_next_slot_is_disabled_not_fired() {
        let (trigger, store) = trigger(10);
        let anchor = Utc::now() - minutes(1);
        let mut schedule =
            ScheduledTask::interval("x", "RefreshMonitored", Duration::from_secs(u64::MAX / 2))
                .with_overlap_policy(OverlapPolicy::Allow);
        schedule.anchor = anchor;
        schedule.next_run_at = anchor;
        store.save_schedule(&schedule).await.unwrap();

        for _ in 0..5 {
            assert!(trigger.tick(Utc::now()).await.unwrap().is_empty());
        }
        assert!(store
            .list_instances(&TaskFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(!trigger.get(schedule.id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_disabled_schedules_never_fire() {
        let (trigger, _) = trigger(10);
        let anchor = Utc::now() - minutes(60);
        let schedule = trigger
            .upsert(every_five_minutes(anchor).disabled())
            .await
            .unwrap();

        assert!(trigger.tick(Utc::now()).await.unwrap().is_empty());

        let enabled = trigger.set_enabled(schedule.id, true).await.unwrap();
        assert!(enabled.next_run_at > Utc::now());
    }

    #[tokio::test]
    async fn test_run_now_respects_overlap() {
        let (trigger, _) = trigger(10);
        let schedule = trigger
            .upsert(every_five_minutes(Utc::now()).with_priority(Priority::High))
            .await
            .unwrap();
        let next_run_at = schedule.next_run_at;

        let instance = trigger.run_now(schedule.id).await.unwrap().unwrap();
        assert_eq!(instance.priority, Priority::High);
        // Previous instance still queued
        assert!(trigger.run_now(schedule.id).await.unwrap().is_none());
        assert_eq!(trigger.get(schedule.id).await.unwrap().next_run_at, next_run_at);
    }
}
