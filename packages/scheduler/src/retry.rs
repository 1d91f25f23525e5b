//! Retry policy and coordinator
//!
//! A failed attempt with attempts left is followed, after an exponential
//! backoff delay, by a new `TaskInstance` in the same retry chain. The
//! successor re-enters the back of its queue.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use reel_shared_config::RetryConfig;

use crate::dispatcher::Dispatcher;
use crate::error::TaskError;
use crate::queue::Admission;
use crate::task::TaskInstance;

/// Exponential backoff with proportional jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// `min(max_delay, base_delay * factor^(attempt-1))` for the failed 1-based `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.config.base_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        if !scaled.is_finite() || scaled >= max {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Backoff with `± jitter` spread applied, never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.config.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }

        let spread = rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
        let jittered = backoff.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.max(0.0)).min(self.config.max_delay)
    }
}

/// Schedules successor attempts for failed instances
#[derive(Clone)]
pub(crate) struct RetryCoordinator {
    dispatcher: Dispatcher,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    timers: TaskTracker,
}

impl RetryCoordinator {
    pub fn new(
        dispatcher: Dispatcher,
        policy: RetryPolicy,
        shutdown: CancellationToken,
        timers: TaskTracker,
    ) -> Self {
        Self {
            dispatcher,
            policy,
            shutdown,
            timers,
        }
    }

    /// React to an instance that was just recorded as Failed
    pub fn on_failure(&self, failed: &TaskInstance, error: &TaskError) {
        if !error.is_retryable() {
            tracing::warn!(
                task_id = %failed.id,
                task_type = %failed.task_type,
                attempt = failed.attempt,
                error = %error,
                "Task failed with non-retryable error, retry chain ended"
            );
            return;
        }
        if !failed.has_attempts_left() {
            tracing::warn!(
                task_id = %failed.id,
                task_type = %failed.task_type,
                attempt = failed.attempt,
                max_attempts = failed.max_attempts,
                error = %error,
                "Task exhausted all attempts, retry chain ended"
            );
            return;
        }

        let delay = self.policy.delay_for(failed.attempt);
        tracing::info!(
            task_id = %failed.id,
            task_type = %failed.task_type,
            attempt = failed.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        let failed = failed.clone();
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();
        self.timers.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(task_id = %failed.id, "Pending retry dropped on shutdown");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if dispatcher.is_closed() {
                return;
            }

            let Some(next) = failed.next_attempt() else {
                return;
            };
            match dispatcher.enqueue(&next, Admission::Readmit).await {
                Ok(()) => tracing::info!(
                    task_id = %next.id,
                    retry_chain_id = %next.retry_chain_id,
                    attempt = next.attempt,
                    waited_ms = (Utc::now() - failed.completed_at.unwrap_or(next.created_at))
                        .num_milliseconds(),
                    "Retry attempt enqueued"
                ),
                Err(e) => {
                    tracing::error!(
                        retry_chain_id = %next.retry_chain_id,
                        attempt = next.attempt,
                        error = %e,
                        "Failed to enqueue retry attempt"
                    );
                }
            }
        });
    }
}
