//! Task instance model and state machine
//!
//! A `TaskInstance` is one attempt of one logical submission. Attempts of the
//! same submission share a `retry_chain_id` (the first attempt's id).
//!
//! ```text
//! Queued ──► Running ──► Succeeded | Failed | Cancelled | TimedOut
//!   │
//!   └──────► Cancelled
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};

/// Priority tier; each tier has its own queue and worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Default,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Default, Priority::Background];

    /// Name of the queue serving this priority
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Default => "default",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

impl FromStr for Priority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "default" | "normal" => Ok(Self::Default),
            "background" | "low" => Ok(Self::Background),
            _ => Err(SchedulerError::InvalidPriority(s.to_string())),
        }
    }
}

/// Lifecycle status of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Legal edges of the state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timedout" | "timed_out" => Ok(Self::TimedOut),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// One schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,

    /// 0-100, never decreases within one attempt
    pub progress_percent: u8,
    pub progress_message: Option<String>,

    /// 1-based attempt number within the retry chain
    pub attempt: u32,
    pub max_attempts: u32,
    pub retry_chain_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,

    /// Execution budget measured from `started_at`
    pub timeout: Duration,

    /// Last failure reason
    pub error: Option<String>,

    /// Opaque payload handed to the handler
    pub params: serde_json::Value,

    /// Schedule that fired this instance, if any
    pub schedule_id: Option<Uuid>,
}

impl TaskInstance {
    /// Create the first attempt of a new submission
    pub fn new(
        task_type: impl Into<String>,
        params: serde_json::Value,
        priority: Priority,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            task_type: task_type.into(),
            priority,
            status: TaskStatus::Queued,
            progress_percent: 0,
            progress_message: None,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            retry_chain_id: id,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            timeout,
            error: None,
            params,
            schedule_id: None,
        }
    }

    /// Name of the queue this instance belongs to
    pub fn queue_name(&self) -> &'static str {
        self.priority.queue_name()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt may follow this one
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Build the successor attempt in this chain, if attempts remain
    pub fn next_attempt(&self) -> Option<TaskInstance> {
        if !self.has_attempts_left() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Queued,
            progress_percent: 0,
            progress_message: None,
            attempt: self.attempt + 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            error: None,
            ..self.clone()
        })
    }

    fn ensure_transition(&self, next: TaskStatus) -> SchedulerResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    /// Queued -> Running
    pub fn start(&mut self, at: DateTime<Utc>) -> SchedulerResult<()> {
        self.ensure_transition(TaskStatus::Running)?;
        let budget = chrono::Duration::from_std(self.timeout)
            .unwrap_or(chrono::TimeDelta::MAX);
        self.status = TaskStatus::Running;
        self.started_at = Some(at);
        self.deadline = at.checked_add_signed(budget);
        Ok(())
    }

    /// Move to a terminal status
    pub fn finish(
        &mut self,
        status: TaskStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        if !status.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: status,
            });
        }
        self.ensure_transition(status)?;
        if self.started_at.is_none() {
            // Queued -> Cancelled still leaves Queued
            self.started_at = Some(at);
        }
        if status == TaskStatus::Succeeded {
            self.progress_percent = 100;
        }
        self.status = status;
        self.completed_at = Some(at);
        if error.is_some() {
            self.error = error;
        }
        Ok(())
    }

    /// Apply a progress report; ignored unless Running.
    ///
    /// Returns whether the report was applied.
    pub fn record_progress(&mut self, percent: i32, message: Option<String>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        let percent = percent.clamp(0, 100) as u8;
        self.progress_percent = self.progress_percent.max(percent);
        if message.is_some() {
            self.progress_message = message;
        }
        true
    }
}

/// Query filter for `List`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_type: Option<String>,
    pub retry_chain_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn retry_chain(mut self, chain_id: Uuid) -> Self {
        self.retry_chain_id = Some(chain_id);
        self
    }

    pub fn schedule(mut self, schedule_id: Uuid) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    pub fn matches(&self, instance: &TaskInstance) -> bool {
        self.status.map_or(true, |s| instance.status == s)
            && self.priority.map_or(true, |p| instance.priority == p)
            && self
                .task_type
                .as_deref()
                .map_or(true, |t| instance.task_type == t)
            && self
                .retry_chain_id
                .map_or(true, |c| instance.retry_chain_id == c)
            && self
                .schedule_id
                .map_or(true, |s| instance.schedule_id == Some(s))
    }
}

/// Worker slot currently bound to a running task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBinding {
    pub worker: usize,
    pub task_id: Uuid,
}

/// Point-in-time view of one queue and its pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub priority: Priority,
    pub worker_count: usize,
    pub active_count: usize,
    pub queued_count: usize,
    pub capacity: usize,
    pub bindings: Vec<WorkerBinding>,
}
