//! Built-in job integration tests
//!
//! - HealthCheck reports per-queue progress and succeeds
//! - Housekeeping prunes terminal history within retention bounds
//! - Default schedules install once and fire through the trigger loop

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::*;
use reel_scheduler::{Priority, TaskFilter, TaskRequest, TaskStatus};
use reel_test_utils::{eventually, test_config, wait_for_status, RecordingHandler};
use reel_worker::jobs::{self, health_check, housekeeping};
use reel_worker::WorkerError;
use serde_json::json;

// =============================================================================
// HealthCheck
// =============================================================================

#[tokio::test]
async fn test_health_check_succeeds_with_full_progress() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    scheduler.start().await.unwrap();

    let task = submit(&scheduler, health_check::TASK_TYPE).await;
    assert_eq!(task.priority, Priority::High);
    assert_eq!(task.max_attempts, 1);
    assert_eq!(task.timeout, Duration::from_secs(30));

    let done = wait_for_status(scheduler.dispatcher(), task.id, TaskStatus::Succeeded, WAIT).await;
    assert_eq!(done.progress_percent, 100);
    assert_eq!(done.progress_message.as_deref(), Some("all queues healthy"));
    assert!(done.error.is_none());

    scheduler.stop().await.unwrap();
}

// =============================================================================
// Housekeeping
// =============================================================================

#[tokio::test]
async fn test_housekeeping_keeps_newest_entries() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    let handler = RecordingHandler::new();
    register(&scheduler, NOOP, &handler);
    scheduler.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let task = submit(&scheduler, NOOP).await;
        wait_for_status(scheduler.dispatcher(), task.id, TaskStatus::Succeeded, WAIT).await;
        ids.push(task.id);
    }

    let cleanup = scheduler
        .submit(TaskRequest::new(housekeeping::TASK_TYPE).params(json!({ "max_entries": 2 })))
        .await
        .unwrap();
    assert_eq!(cleanup.priority, Priority::Background);

    let done = wait_for_status(scheduler.dispatcher(), cleanup.id, TaskStatus::Succeeded, WAIT).await;
    assert_eq!(done.progress_message.as_deref(), Some("pruned 3 tasks"));

    let remaining: Vec<_> = scheduler
        .list(&TaskFilter::new().task_type(NOOP))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(remaining, ids[3..].to_vec());

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_housekeeping_rejects_bad_params_without_retry() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    scheduler.start().await.unwrap();

    let task = scheduler
        .submit(TaskRequest::new(housekeeping::TASK_TYPE).params(json!({ "max_entries": -1 })))
        .await
        .unwrap();

    let failed = wait_for_status(scheduler.dispatcher(), task.id, TaskStatus::Failed, WAIT).await;
    assert!(failed.error.unwrap().contains("invalid payload"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let chain = scheduler
        .list(&TaskFilter::new().retry_chain(task.id))
        .await
        .unwrap();
    assert_eq!(chain.len(), 1);

    scheduler.stop().await.unwrap();
}

// =============================================================================
// Default Schedules
// =============================================================================

#[tokio::test]
async fn test_default_schedules_install_once() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    let config = worker_config(test_config());

    jobs::install_default_schedules(&scheduler, &config).await.unwrap();
    jobs::install_default_schedules(&scheduler, &config).await.unwrap();

    let mut schedules = scheduler.list_schedules().await.unwrap();
    schedules.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<_> = schedules.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![jobs::HEALTH_CHECK_SCHEDULE, jobs::HOUSEKEEPING_SCHEDULE]);
    assert_eq!(schedules[0].priority, Priority::High);
    assert_eq!(schedules[1].priority, Priority::Background);
}

#[tokio::test]
async fn test_invalid_housekeeping_cron_is_a_configuration_error() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    let mut config = worker_config(test_config());
    config.housekeeping_cron = "every night".to_string();

    let err = jobs::install_default_schedules(&scheduler, &config)
        .await
        .unwrap_err();
    assert_matches!(err, WorkerError::Configuration(msg) if msg.contains("REEL_HOUSEKEEPING_CRON"));
}

#[tokio::test]
async fn test_health_check_schedule_fires_from_trigger_loop() {
    let scheduler = scheduler(test_config());
    jobs::register_builtin(&scheduler, scheduler.config().retention);
    let mut config = worker_config(test_config());
    config.health_check_interval = Duration::from_millis(50);

    jobs::install_default_schedules(&scheduler, &config).await.unwrap();
    scheduler.start().await.unwrap();

    let filter = TaskFilter::new()
        .task_type(health_check::TASK_TYPE)
        .status(TaskStatus::Succeeded);
    let runs = eventually(WAIT, "two scheduled health checks", || {
        let filter = filter.clone();
        let scheduler = &scheduler;
        async move {
            let runs = scheduler.list(&filter).await.ok()?;
            (runs.len() >= 2).then_some(runs)
        }
    })
    .await;
    assert!(runs.iter().all(|run| run.schedule_id.is_some()));

    scheduler.stop().await.unwrap();
}
