//! In-memory task store
//!
//! Rows live in `DashMap`s; `get_mut` holds the shard lock for the row while
//! a transition is applied, which gives per-row compare-and-set semantics.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::TaskStore;
use crate::error::{SchedulerError, SchedulerResult};
use crate::schedule::ScheduledTask;
use crate::task::{TaskFilter, TaskInstance, TaskStatus};

#[derive(Debug)]
struct StoredInstance {
    /// Insertion sequence, used for stable submission-order listing
    seq: u64,
    instance: TaskInstance,
}

/// Process-local `TaskStore`
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    instances: DashMap<Uuid, StoredInstance>,
    schedules: DashMap<Uuid, ScheduledTask>,
    next_seq: AtomicU64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instance rows currently held
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save_instance(&self, instance: &TaskInstance) -> SchedulerResult<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.instances
            .entry(instance.id)
            .and_modify(|row| row.instance = instance.clone())
            .or_insert_with(|| StoredInstance {
                seq,
                instance: instance.clone(),
            });
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> SchedulerResult<Option<TaskInstance>> {
        Ok(self.instances.get(&id).map(|row| row.instance.clone()))
    }

    async fn list_instances(&self, filter: &TaskFilter) -> SchedulerResult<Vec<TaskInstance>> {
        let mut rows: Vec<(u64, TaskInstance)> = self
            .instances
            .iter()
            .filter(|row| filter.matches(&row.instance))
            .map(|row| (row.seq, row.instance.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, instance)| instance).collect())
    }

    async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> SchedulerResult<Option<TaskInstance>> {
        let Some(mut row) = self.instances.get_mut(&id) else {
            return Ok(None);
        };
        if row.instance.status != TaskStatus::Queued {
            return Ok(None);
        }
        row.instance.start(at)?;
        Ok(Some(row.instance.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> SchedulerResult<TaskInstance> {
        let mut row = self
            .instances
            .get_mut(&id)
            .ok_or(SchedulerError::NotFound(id))?;
        row.instance.finish(status, error, at)?;
        Ok(row.instance.clone())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        percent: i32,
        message: Option<String>,
    ) -> SchedulerResult<()> {
        if let Some(mut row) = self.instances.get_mut(&id) {
            row.instance.record_progress(percent, message);
        }
        Ok(())
    }

    async fn save_schedule(&self, schedule: &ScheduledTask) -> SchedulerResult<()> {
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn load_schedule(&self, id: Uuid) -> SchedulerResult<Option<ScheduledTask>> {
        Ok(self.schedules.get(&id).map(|s| s.clone()))
    }

    async fn list_schedules(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut schedules: Vec<ScheduledTask> =
            self.schedules.iter().map(|s| s.value().clone()).collect();
        schedules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schedules)
    }

    async fn delete_schedule(&self, id: Uuid) -> SchedulerResult<bool> {
        Ok(self.schedules.remove(&id).is_some())
    }

    async fn prune(&self, older_than: DateTime<Utc>, max_entries: usize) -> SchedulerResult<usize> {
        let mut terminal: Vec<(DateTime<Utc>, u64, Uuid)> = self
            .instances
            .iter()
            .filter(|row| row.instance.is_terminal())
            .filter_map(|row| {
                row.instance
                    .completed_at
                    .map(|completed| (completed, row.seq, row.instance.id))
            })
            .collect();
        terminal.sort();

        let expired = terminal
            .iter()
            .take_while(|(completed, _, _)| *completed < older_than)
            .count();
        let overflow = (terminal.len() - expired).saturating_sub(max_entries);

        let mut removed = 0;
        for (_, _, id) in terminal.iter().take(expired + overflow) {
            if self.instances.remove(id).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Pruned task history");
        }
        Ok(removed)
    }
}
