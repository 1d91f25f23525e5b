//! Retry and backoff configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{parse_env, ConfigError, ConfigResult};

/// Exponential backoff settings applied between attempts of one retry chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Upper bound for any computed delay
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub backoff_factor: f64,

    /// Random spread as a fraction of the computed delay (0.0 - 1.0)
    pub jitter: f64,

    /// Attempts per submission when neither the request nor the task type sets one
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Load retry configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            base_delay: Duration::from_millis(parse_env("REEL_RETRY_BASE_DELAY_MS", 5_000)?),
            max_delay: Duration::from_millis(parse_env("REEL_RETRY_MAX_DELAY_MS", 300_000)?),
            backoff_factor: parse_env("REEL_RETRY_BACKOFF_FACTOR", 2.0)?,
            jitter: parse_env("REEL_RETRY_JITTER", 0.1)?,
            max_attempts: parse_env("REEL_MAX_ATTEMPTS", 3)?,
        })
    }

    /// Deterministic policy without jitter (useful for testing)
    pub fn fixed(base_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_factor,
            jitter: 0.0,
            max_attempts: 3,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "backoff factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::ValidationError(format!(
                "retry jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::ValidationError(
                "max retry delay must not be smaller than the base delay".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
            jitter: 0.1,
            max_attempts: 3,
        }
    }
}
