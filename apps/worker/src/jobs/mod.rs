//! Built-in maintenance jobs
//!
//! - [`health_check`]: verifies every queue still has live workers
//! - [`housekeeping`]: prunes terminal task history
//!
//! Both are registered on startup and driven by recurring schedules.

pub mod health_check;
pub mod housekeeping;

use std::sync::Arc;
use std::time::Duration;

use reel_scheduler::{
    OverlapPolicy, Priority, RetentionConfig, ScheduledTask, Scheduler, TaskTypeOptions,
};

use crate::config::Config;
use crate::error::{WorkerError, WorkerResult};

pub use health_check::HealthCheck;
pub use housekeeping::{Housekeeping, HousekeepingParams};

pub const HEALTH_CHECK_SCHEDULE: &str = "health-check";
pub const HOUSEKEEPING_SCHEDULE: &str = "housekeeping";

/// Register the built-in task types on `scheduler`
pub fn register_builtin(scheduler: &Scheduler, retention: RetentionConfig) {
    let registry = scheduler.registry();

    registry.register_handler(
        health_check::TASK_TYPE,
        TaskTypeOptions::default()
            .priority(Priority::High)
            .max_attempts(1)
            .timeout(Duration::from_secs(30)),
        Arc::new(HealthCheck::new(scheduler.dispatcher().clone())),
    );

    registry.register_handler(
        housekeeping::TASK_TYPE,
        TaskTypeOptions::default()
            .priority(Priority::Background)
            .max_attempts(2)
            .timeout(Duration::from_secs(600)),
        Arc::new(Housekeeping::new(scheduler.store().clone(), retention)),
    );

    tracing::info!(task_types = ?registry.task_types(), "Registered built-in jobs");
}

/// Install the default recurring schedules, leaving existing ones untouched
pub async fn install_default_schedules(scheduler: &Scheduler, config: &Config) -> WorkerResult<()> {
    let existing: Vec<String> = scheduler
        .list_schedules()
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect();

    if !existing.iter().any(|name| name == HEALTH_CHECK_SCHEDULE) {
        let schedule = ScheduledTask::interval(
            HEALTH_CHECK_SCHEDULE,
            health_check::TASK_TYPE,
            config.health_check_interval,
        )
        .with_priority(Priority::High)
        .with_overlap_policy(OverlapPolicy::Skip);
        let schedule = scheduler.upsert_schedule(schedule).await?;
        tracing::info!(schedule_id = %schedule.id, next_run_at = %schedule.next_run_at, "Installed health check schedule");
    }

    if !existing.iter().any(|name| name == HOUSEKEEPING_SCHEDULE) {
        let schedule = ScheduledTask::cron(
            HOUSEKEEPING_SCHEDULE,
            housekeeping::TASK_TYPE,
            config.housekeeping_cron.clone(),
        )
        .map_err(|e| WorkerError::Configuration(format!("REEL_HOUSEKEEPING_CRON: {}", e)))?
        .with_priority(Priority::Background)
        .with_overlap_policy(OverlapPolicy::Skip);
        let schedule = scheduler.upsert_schedule(schedule).await?;
        tracing::info!(schedule_id = %schedule.id, next_run_at = %schedule.next_run_at, "Installed housekeeping schedule");
    }

    Ok(())
}
