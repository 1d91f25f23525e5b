//! History housekeeping job
//!
//! Prunes terminal task instances past the retention bounds. Queued and
//! Running rows are never touched by the store's prune.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reel_scheduler::{RetentionConfig, TaskContext, TaskHandler, TaskResult, TaskStore};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

pub const TASK_TYPE: &str = "Housekeeping";

/// Housekeeping job payload; unset fields fall back to the configured retention
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingParams {
    /// Prune terminal instances older than this many hours
    pub max_age_hours: Option<u64>,

    /// Keep at most this many terminal instances
    pub max_entries: Option<usize>,
}

impl HousekeepingParams {
    /// Parse task params; `null` means all defaults
    pub fn parse(params: serde_json::Value) -> WorkerResult<Self> {
        let params: Option<Self> = serde_json::from_value(params)?;
        Ok(params.unwrap_or_default())
    }

    /// Resolve against the configured retention
    pub fn resolve(&self, retention: RetentionConfig) -> RetentionConfig {
        RetentionConfig {
            max_age: self
                .max_age_hours
                .map(|h| Duration::from_secs(h.saturating_mul(3600)))
                .unwrap_or(retention.max_age),
            max_entries: self.max_entries.unwrap_or(retention.max_entries),
        }
    }
}

/// Housekeeping handler
#[derive(Clone)]
pub struct Housekeeping {
    store: Arc<dyn TaskStore>,
    retention: RetentionConfig,
}

impl Housekeeping {
    pub fn new(store: Arc<dyn TaskStore>, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    async fn run(&self, params: serde_json::Value) -> WorkerResult<usize> {
        let retention = HousekeepingParams::parse(params)?.resolve(self.retention);
        let max_age = chrono::Duration::from_std(retention.max_age)
            .map_err(|e| WorkerError::Configuration(format!("retention max age: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let pruned = self.store.prune(cutoff, retention.max_entries).await?;
        Ok(pruned)
    }
}

#[async_trait]
impl TaskHandler for Housekeeping {
    async fn execute(&self, ctx: TaskContext, params: serde_json::Value) -> TaskResult {
        ctx.ensure_active()?;

        let pruned = self.run(params).await?;

        tracing::info!(task_id = %ctx.task_id(), pruned, "Pruned task history");
        ctx.report_progress(100, format!("pruned {} tasks", pruned)).await;
        Ok(())
    }
}
