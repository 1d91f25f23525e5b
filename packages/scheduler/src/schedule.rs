//! Recurring schedule definitions
//!
//! A `ScheduledTask` periodically creates task instances through the
//! dispatcher. Interval schedules fire on a fixed grid anchored at
//! `anchor`, so late ticks never accumulate drift. Cron schedules use
//! five-field expressions parsed with `croner`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::Priority;

/// What to do when a firing is due while the previous instance is still active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Skip the firing and wait for the next slot
    #[default]
    Skip,
    /// Fire regardless
    Allow,
}

/// Recurrence rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recurrence {
    Interval { every: Duration },
    Cron { expression: String },
}

impl Recurrence {
    /// Check the rule can produce fire times
    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            Self::Interval { every } => interval_step(*every).map(|_| ()),
            Self::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// First fire time strictly after `now`
    pub fn next_after(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        match self {
            Self::Interval { every } => next_on_grid(anchor, *every, now),
            Self::Cron { expression } => {
                let cron = parse_cron(expression)?;
                cron.find_next_occurrence(&now, false).map_err(|e| {
                    tracing::error!(
                        "Failed to find next cron occurrence for '{}': {}",
                        expression,
                        e
                    );
                    SchedulerError::InvalidSchedule(format!("cron next occurrence: {}", e))
                })
            }
        }
    }
}

fn parse_cron(expression: &str) -> SchedulerResult<Cron> {
    Cron::new(expression)
        .parse()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("invalid cron expression: {}", e)))
}

/// Interval as a chrono step; it must be representable and at least one millisecond
fn interval_step(every: Duration) -> SchedulerResult<chrono::Duration> {
    let step = chrono::Duration::from_std(every)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("interval out of range: {}", e)))?;
    if step.num_milliseconds() <= 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be at least one millisecond".to_string(),
        ));
    }
    Ok(step)
}

/// Smallest `anchor + k * every` strictly after `now`, with `k >= 1`
fn next_on_grid(
    anchor: DateTime<Utc>,
    every: Duration,
    now: DateTime<Utc>,
) -> SchedulerResult<DateTime<Utc>> {
    let step_ms = interval_step(every)?.num_milliseconds();
    let elapsed_ms = (now - anchor).num_milliseconds();
    let periods = if elapsed_ms < 0 {
        1
    } else {
        elapsed_ms / step_ms + 1
    };

    anchor
        .checked_add_signed(chrono::Duration::milliseconds(step_ms.saturating_mul(periods)))
        .ok_or_else(|| SchedulerError::InvalidSchedule("next run overflows".to_string()))
}

/// A recurring trigger definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub task_type: String,
    pub priority: Priority,
    pub params: serde_json::Value,
    pub recurrence: Recurrence,
    pub enabled: bool,
    pub overlap_policy: OverlapPolicy,

    /// Grid origin for interval schedules
    pub anchor: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,

    /// Most recent instance fired by this schedule
    pub last_instance_id: Option<Uuid>,
}

impl ScheduledTask {
    /// Interval schedule anchored now; first fires one interval from now
    ///
    /// An interval too large to land on the calendar parks `next_run_at` at
    /// the end of time, and `validate` rejects it.
    pub fn interval(name: impl Into<String>, task_type: impl Into<String>, every: Duration) -> Self {
        let anchor = Utc::now();
        let next_run_at = chrono::Duration::from_std(every)
            .ok()
            .and_then(|step| anchor.checked_add_signed(step))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::build(
            name,
            task_type,
            Recurrence::Interval { every },
            anchor,
            next_run_at,
        )
    }

    /// Cron schedule; the expression is validated immediately
    pub fn cron(
        name: impl Into<String>,
        task_type: impl Into<String>,
        expression: impl Into<String>,
    ) -> SchedulerResult<Self> {
        let recurrence = Recurrence::Cron {
            expression: expression.into(),
        };
        let anchor = Utc::now();
        let next_run_at = recurrence.next_after(anchor, anchor)?;
        Ok(Self::build(name, task_type, recurrence, anchor, next_run_at))
    }

    fn build(
        name: impl Into<String>,
        task_type: impl Into<String>,
        recurrence: Recurrence,
        anchor: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task_type: task_type.into(),
            priority: Priority::Default,
            params: serde_json::Value::Null,
            recurrence,
            enabled: true,
            overlap_policy: OverlapPolicy::default(),
            anchor,
            last_run_at: None,
            next_run_at,
            last_instance_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Move the grid origin; the next run becomes the first slot after `anchor`
    pub fn anchored_at(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = anchor;
        if let Ok(next) = self.recurrence.next_after(anchor, anchor) {
            self.next_run_at = next;
        }
        self
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(
                "schedule name must not be empty".to_string(),
            ));
        }
        self.recurrence.validate()?;
        // The first slot after the anchor must exist on the calendar
        self.next_run_after(self.anchor).map(|_| ())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }

    /// Next fire time after `now`, derived from the schedule rather than `last_run_at`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        self.recurrence.next_after(self.anchor, now)
    }
}
