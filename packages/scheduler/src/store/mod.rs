//! Persistence surface for task instances and schedules
//!
//! The store is the only shared mutable state in the scheduler. Every status
//! change goes through a compare-and-set method here, so two workers can
//! never claim the same queued instance and a terminal row is never
//! rewritten.

mod memory;

pub use memory::MemoryTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SchedulerResult;
use crate::schedule::ScheduledTask;
use crate::task::{TaskFilter, TaskInstance, TaskStatus};

/// Durable record of task instances, their history, and recurring schedules
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite an instance row
    async fn save_instance(&self, instance: &TaskInstance) -> SchedulerResult<()>;

    async fn load_instance(&self, id: Uuid) -> SchedulerResult<Option<TaskInstance>>;

    /// Instances matching `filter`, in insertion order
    async fn list_instances(&self, filter: &TaskFilter) -> SchedulerResult<Vec<TaskInstance>>;

    /// Atomically move a Queued instance to Running.
    ///
    /// Returns `None` if the instance is missing or no longer Queued.
    async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> SchedulerResult<Option<TaskInstance>>;

    /// Atomically apply a state machine transition to a terminal status.
    ///
    /// Fails with `InvalidTransition` when the row's current status does not
    /// allow it (in particular when it is already terminal).
    async fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> SchedulerResult<TaskInstance>;

    /// Last-write-wins progress update; ignored unless the row is Running
    async fn update_progress(
        &self,
        id: Uuid,
        percent: i32,
        message: Option<String>,
    ) -> SchedulerResult<()>;

    async fn save_schedule(&self, schedule: &ScheduledTask) -> SchedulerResult<()>;

    async fn load_schedule(&self, id: Uuid) -> SchedulerResult<Option<ScheduledTask>>;

    async fn list_schedules(&self) -> SchedulerResult<Vec<ScheduledTask>>;

    /// Returns whether a schedule was removed
    async fn delete_schedule(&self, id: Uuid) -> SchedulerResult<bool>;

    /// Delete terminal instances completed before `older_than`, then the
    /// oldest remaining terminal instances beyond `max_entries`.
    ///
    /// Queued and Running rows are never pruned. Returns the number removed.
    async fn prune(&self, older_than: DateTime<Utc>, max_entries: usize) -> SchedulerResult<usize>;
}
