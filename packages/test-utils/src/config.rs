//! Scheduler configurations scaled down for tests

use std::time::Duration;

use reel_shared_config::{QueueConfig, RetentionConfig, RetryConfig, SchedulerConfig};

/// Millisecond-scale configuration with deterministic backoff (no jitter)
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        high: QueueConfig::with_workers(2),
        default: QueueConfig::with_workers(2),
        background: QueueConfig::with_workers(1),
        retry: RetryConfig::fixed(
            Duration::from_millis(50),
            2.0,
            Duration::from_millis(400),
        ),
        default_timeout: Duration::from_secs(5),
        cancel_grace: Duration::from_millis(200),
        tick_interval: Duration::from_millis(20),
        retention: RetentionConfig::default(),
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// [`test_config`] with the given worker count on every queue
pub fn with_workers(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        high: QueueConfig::with_workers(workers),
        default: QueueConfig::with_workers(workers),
        background: QueueConfig::with_workers(workers),
        ..test_config()
    }
}
