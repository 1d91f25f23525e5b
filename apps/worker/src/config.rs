//! Worker configuration loaded from environment variables
//!
//! Scheduler tuning lives in [`SchedulerConfig`]; this module adds the
//! settings for the worker's own built-in schedules.

use std::time::Duration;

use anyhow::{Context, Result};
use reel_shared_config::{parse_env, CommonConfig, Environment, SchedulerConfig};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Queue, retry and timeout settings for the scheduler
    pub scheduler: SchedulerConfig,

    /// How often the HealthCheck job runs
    pub health_check_interval: Duration,

    /// Cron expression for the Housekeeping job
    pub housekeeping_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env().context("Failed to load common config")?;
        let scheduler = SchedulerConfig::from_env().context("Failed to load scheduler config")?;

        let health_check_secs: u64 = parse_env("REEL_HEALTH_CHECK_INTERVAL_SECS", 300)
            .context("Invalid REEL_HEALTH_CHECK_INTERVAL_SECS value")?;
        if health_check_secs == 0 {
            anyhow::bail!("REEL_HEALTH_CHECK_INTERVAL_SECS must be greater than zero");
        }

        let housekeeping_cron = std::env::var("REEL_HOUSEKEEPING_CRON")
            .unwrap_or_else(|_| "0 3 * * *".to_string());

        Ok(Self {
            common,
            scheduler,
            health_check_interval: Duration::from_secs(health_check_secs),
            housekeeping_cron,
        })
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }
}
