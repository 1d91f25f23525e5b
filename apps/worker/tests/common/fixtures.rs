//! Scheduler fixtures

use std::sync::Arc;
use std::time::Duration;

use reel_scheduler::{
    Scheduler, SchedulerConfig, TaskHandler, TaskInstance, TaskRequest, TaskTypeOptions,
};
use reel_shared_config::{CommonConfig, Environment};
use reel_worker::Config;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Task type used for handlers that only record their calls
pub const NOOP: &str = "Noop";

pub fn scheduler(config: SchedulerConfig) -> Scheduler {
    Scheduler::builder(config).build().unwrap()
}

/// Register a clone of `handler` under `task_type` with default options
pub fn register<H>(scheduler: &Scheduler, task_type: &str, handler: &H)
where
    H: TaskHandler + Clone + 'static,
{
    register_with(scheduler, task_type, TaskTypeOptions::default(), handler);
}

pub fn register_with<H>(
    scheduler: &Scheduler,
    task_type: &str,
    options: TaskTypeOptions,
    handler: &H,
) where
    H: TaskHandler + Clone + 'static,
{
    scheduler
        .registry()
        .register_handler(task_type, options, Arc::new(handler.clone()));
}

pub async fn submit(scheduler: &Scheduler, task_type: &str) -> TaskInstance {
    scheduler.submit(TaskRequest::new(task_type)).await.unwrap()
}

/// Worker configuration around a scaled-down scheduler config
pub fn worker_config(scheduler: SchedulerConfig) -> Config {
    Config {
        common: CommonConfig {
            environment: Environment::Development,
            log_level: "debug".to_string(),
        },
        scheduler,
        health_check_interval: Duration::from_secs(3600),
        housekeeping_cron: "0 3 * * *".to_string(),
    }
}
