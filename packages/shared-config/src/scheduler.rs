//! Task scheduler configuration

use std::time::Duration;

use crate::{parse_env, ConfigError, ConfigResult, QueueConfig, RetryConfig};

/// History retention bounds for terminal task instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Terminal instances older than this are pruned
    pub max_age: Duration,

    /// At most this many terminal instances are kept
    pub max_entries: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 3600),
            max_entries: 10_000,
        }
    }
}

/// Complete scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// High priority queue (user-facing, latency sensitive work)
    pub high: QueueConfig,

    /// Default priority queue
    pub default: QueueConfig,

    /// Background queue (housekeeping, bulk refreshes)
    pub background: QueueConfig,

    /// Retry and backoff policy
    pub retry: RetryConfig,

    /// Execution timeout when neither the request nor the task type sets one
    pub default_timeout: Duration,

    /// How long a cancelled handler may keep running before its slot is reclaimed
    pub cancel_grace: Duration,

    /// Schedule trigger polling interval
    pub tick_interval: Duration,

    /// History retention bounds
    pub retention: RetentionConfig,

    /// How long `stop()` waits for workers to drain
    pub shutdown_timeout: Duration,
}

impl SchedulerConfig {
    /// Load scheduler configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            high: QueueConfig::from_env("HIGH", 5)?,
            default: QueueConfig::from_env("DEFAULT", 3)?,
            background: QueueConfig::from_env("BACKGROUND", 2)?,
            retry: RetryConfig::from_env()?,
            default_timeout: Duration::from_secs(parse_env("REEL_TASK_TIMEOUT_SECS", 3600)?),
            cancel_grace: Duration::from_millis(parse_env("REEL_CANCEL_GRACE_MS", 5_000)?),
            tick_interval: Duration::from_secs(parse_env("REEL_SCHEDULE_TICK_SECS", 60)?),
            retention: RetentionConfig {
                max_age: hours_env("REEL_HISTORY_MAX_AGE_HOURS", 168)?,
                max_entries: parse_env("REEL_HISTORY_MAX_ENTRIES", 10_000)?,
            },
            shutdown_timeout: Duration::from_secs(parse_env("REEL_SHUTDOWN_TIMEOUT_SECS", 30)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the scheduler relies on
    pub fn validate(&self) -> ConfigResult<()> {
        self.high.validate("high")?;
        self.default.validate("default")?;
        self.background.validate("background")?;
        self.retry.validate()?;
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "schedule tick interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            high: QueueConfig::with_workers(5),
            default: QueueConfig::with_workers(3),
            background: QueueConfig::with_workers(2),
            retry: RetryConfig::default(),
            default_timeout: Duration::from_secs(3600),
            cancel_grace: Duration::from_secs(5),
            tick_interval: Duration::from_secs(60),
            retention: RetentionConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn hours_env(name: &str, default: u64) -> ConfigResult<Duration> {
    parse_env::<u64>(name, default)?
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue(name.to_string(), "too many hours".to_string()))
}
