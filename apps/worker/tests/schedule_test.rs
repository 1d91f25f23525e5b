//! Recurring schedule integration tests
//!
//! Ticks are driven by hand with explicit clock values, except where the
//! trigger loop itself is under test.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::*;
use reel_scheduler::{OverlapPolicy, Priority, ScheduledTask, TaskFilter, TaskStatus};
use reel_test_utils::{eventually, test_config, wait_for_status, RecordingHandler};
use serde_json::json;

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

#[tokio::test]
async fn test_skip_policy_waits_for_previous_instance() {
    let scheduler = scheduler(test_config());
    let handler = RecordingHandler::new();
    register(&scheduler, "RssSync", &handler);

    let t0 = Utc::now();
    let schedule = scheduler
        .upsert_schedule(
            ScheduledTask::interval("rss", "RssSync", Duration::from_secs(60))
                .anchored_at(t0)
                .with_priority(Priority::High)
                .with_params(json!({ "indexers": "all" }))
                .with_overlap_policy(OverlapPolicy::Skip),
        )
        .await
        .unwrap();

    // Not started: the first instance stays Queued
    let first = scheduler.trigger().tick(t0 + minutes(1)).await.unwrap();
    assert_eq!(first.fired.len(), 1);

    let second = scheduler.trigger().tick(t0 + minutes(2)).await.unwrap();
    assert!(second.fired.is_empty());
    assert_eq!(second.skipped, vec![schedule.id]);

    let stored = scheduler.trigger().get(schedule.id).await.unwrap();
    assert_eq!(stored.next_run_at, t0 + minutes(3));
    assert_eq!(stored.last_instance_id, Some(first.fired[0]));

    scheduler.start().await.unwrap();
    let instance = wait_for_status(scheduler.dispatcher(), first.fired[0], TaskStatus::Succeeded, WAIT).await;
    assert_eq!(instance.schedule_id, Some(schedule.id));
    assert_eq!(instance.priority, Priority::High);
    assert_eq!(instance.params, json!({ "indexers": "all" }));

    let third = scheduler.trigger().tick(t0 + minutes(3)).await.unwrap();
    assert_eq!(third.fired.len(), 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn test_allow_policy_overlaps() {
    let scheduler = scheduler(test_config());
    register(&scheduler, "RssSync", &RecordingHandler::new());

    let t0 = Utc::now();
    let schedule = scheduler
        .upsert_schedule(
            ScheduledTask::interval("rss", "RssSync", Duration::from_secs(60))
                .anchored_at(t0)
                .with_overlap_policy(OverlapPolicy::Allow),
        )
        .await
        .unwrap();

    scheduler.trigger().tick(t0 + minutes(1)).await.unwrap();
    scheduler.trigger().tick(t0 + minutes(2)).await.unwrap();

    let queued = scheduler
        .list(&TaskFilter::new().schedule(schedule.id).status(TaskStatus::Queued))
        .await
        .unwrap();
    assert_eq!(queued.len(), 2);
}

#[tokio::test]
async fn test_late_tick_fires_once_on_the_grid() {
    let scheduler = scheduler(test_config());
    register(&scheduler, "Backup", &RecordingHandler::new());

    let t0 = Utc::now();
    let schedule = scheduler
        .upsert_schedule(
            ScheduledTask::interval("backup", "Backup", Duration::from_secs(300))
                .anchored_at(t0)
                .with_overlap_policy(OverlapPolicy::Allow),
        )
        .await
        .unwrap();

    // Twelve minutes late: one firing, next slot stays on the 5 minute grid
    let report = scheduler.trigger().tick(t0 + minutes(17)).await.unwrap();
    assert_eq!(report.fired.len(), 1);

    let stored = scheduler.trigger().get(schedule.id).await.unwrap();
    assert_eq!(stored.next_run_at, t0 + minutes(20));
}

#[tokio::test]
async fn test_cron_schedule_advances_to_next_match() {
    let scheduler = scheduler(test_config());
    register(&scheduler, "Housekeeping", &RecordingHandler::new());

    let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let schedule = scheduler
        .upsert_schedule(
            ScheduledTask::cron("nightly", "Housekeeping", "0 3 * * *")
                .unwrap()
                .anchored_at(anchor),
        )
        .await
        .unwrap();
    assert_eq!(schedule.next_run_at, Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());

    let report = scheduler
        .trigger()
        .tick(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 30).unwrap())
        .await
        .unwrap();
    assert_eq!(report.fired.len(), 1);

    let stored = scheduler.trigger().get(schedule.id).await.unwrap();
    assert_eq!(stored.next_run_at, Utc.with_ymd_and_hms(2026, 3, 3, 3, 0, 0).unwrap());
}

#[tokio::test]
async fn test_disabled_schedule_resumes_without_backlog() {
    let scheduler = scheduler(test_config());
    register(&scheduler, "RssSync", &RecordingHandler::new());

    let t0 = Utc::now();
    let schedule = scheduler
        .upsert_schedule(
            ScheduledTask::interval("rss", "RssSync", Duration::from_secs(60))
                .anchored_at(t0)
                .disabled(),
        )
        .await
        .unwrap();

    let report = scheduler.trigger().tick(t0 + minutes(5)).await.unwrap();
    assert!(report.is_empty());

    let enabled = scheduler.set_schedule_enabled(schedule.id, true).await.unwrap();
    assert!(enabled.enabled);
    assert!(enabled.next_run_at > Utc::now());
}

#[tokio::test]
async fn test_trigger_loop_fires_interval_schedule() {
    let scheduler = scheduler(test_config());
    let handler = RecordingHandler::new();
    register(&scheduler, "RssSync", &handler);
    let schedule = scheduler
        .upsert_schedule(ScheduledTask::interval(
            "rss",
            "RssSync",
            Duration::from_millis(50),
        ))
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    eventually(WAIT, "three scheduled runs", || {
        let handler = handler.clone();
        async move { (handler.log().count() >= 3).then_some(()) }
    })
    .await;

    let runs = scheduler
        .list(&TaskFilter::new().schedule(schedule.id))
        .await
        .unwrap();
    assert!(runs.len() >= 3);

    scheduler.remove_schedule(schedule.id).await.unwrap();
    scheduler.stop().await.unwrap();
}
