//! Per-queue worker pool configuration

use serde::{Deserialize, Serialize};

use crate::{parse_env, ConfigError, ConfigResult};

/// Default backlog bound for every queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Sizing for one priority queue and its dedicated worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers pulling from this queue
    pub workers: usize,

    /// Maximum number of queued (not yet claimed) tasks before Submit is rejected
    pub capacity: usize,
}

impl QueueConfig {
    /// Create a queue configuration with the given worker count and default capacity
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Builder-style capacity override
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Load a queue configuration from `REEL_<PREFIX>_WORKERS` and `REEL_<PREFIX>_CAPACITY`
    pub fn from_env(prefix: &str, default_workers: usize) -> ConfigResult<Self> {
        Ok(Self {
            workers: parse_env(&format!("REEL_{}_WORKERS", prefix), default_workers)?,
            capacity: parse_env(
                &format!("REEL_{}_CAPACITY", prefix),
                DEFAULT_QUEUE_CAPACITY,
            )?,
        })
    }

    /// Reject pools that could never make progress
    pub fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} queue must have at least one worker",
                name
            )));
        }
        if self.capacity == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} queue capacity must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}
