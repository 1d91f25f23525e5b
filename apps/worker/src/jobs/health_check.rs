//! Queue health check job
//!
//! Walks every queue's status and fails if a pool has lost all of its
//! workers. Queues running close to capacity are logged as warnings.

use async_trait::async_trait;
use reel_scheduler::{Dispatcher, TaskContext, TaskHandler, TaskResult};

use crate::error::WorkerError;

pub const TASK_TYPE: &str = "HealthCheck";

/// Backlog share of capacity above which a queue is reported as saturated
const SATURATION_WARN_RATIO: f64 = 0.8;

/// Health check handler
#[derive(Clone)]
pub struct HealthCheck {
    dispatcher: Dispatcher,
}

impl HealthCheck {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl TaskHandler for HealthCheck {
    async fn execute(&self, ctx: TaskContext, _params: serde_json::Value) -> TaskResult {
        let queues = self.dispatcher.queue_status().await;
        let total = queues.len().max(1);

        for (i, queue) in queues.iter().enumerate() {
            ctx.ensure_active()?;

            if queue.worker_count == 0 {
                return Err(WorkerError::NoLiveWorkers {
                    queue: queue.priority,
                }
                .into());
            }

            let saturation = queue.queued_count as f64 / queue.capacity.max(1) as f64;
            if saturation >= SATURATION_WARN_RATIO {
                tracing::warn!(
                    queue = %queue.priority,
                    queued = queue.queued_count,
                    capacity = queue.capacity,
                    "Queue is close to capacity"
                );
            } else {
                tracing::debug!(
                    queue = %queue.priority,
                    workers = queue.worker_count,
                    active = queue.active_count,
                    queued = queue.queued_count,
                    "Queue healthy"
                );
            }

            let percent = ((i + 1) * 100 / total) as i32;
            ctx.report_progress(
                percent.min(99),
                format!(
                    "{}: {} workers, {} active, {} queued",
                    queue.priority, queue.worker_count, queue.active_count, queue.queued_count
                ),
            )
            .await;
        }

        ctx.report_progress(100, "all queues healthy").await;
        Ok(())
    }
}
