//! Mock task handlers
//!
//! Every mock records its invocations in a [`CallLog`] so tests can assert on
//! call counts, attempt numbers and the timing between attempts.
//!
//! # Lock Poisoning Recovery
//!
//! The call log uses `unwrap_or_else(|e| e.into_inner())` when locking, so a
//! panicking handler (see [`PanickingHandler`]) cannot poison the log for the
//! assertions that follow.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reel_scheduler::{TaskContext, TaskError, TaskHandler, TaskResult};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// One handler invocation
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub task_id: Uuid,
    pub attempt: u32,
    pub params: Value,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

/// Shared, cloneable record of handler invocations
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of an invocation; returns its index
    pub fn start(&self, ctx: &TaskContext, params: &Value) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.push(CallRecord {
            task_id: ctx.task_id(),
            attempt: ctx.attempt(),
            params: params.clone(),
            started_at: Instant::now(),
            finished_at: None,
        });
        calls.len() - 1
    }

    pub fn finish(&self, index: usize) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(call) = calls.get_mut(index) {
            call.finished_at = Some(Instant::now());
        }
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Task ids in invocation order
    pub fn task_ids(&self) -> Vec<Uuid> {
        self.calls().into_iter().map(|c| c.task_id).collect()
    }

    /// Gap between the end of call `i` and the start of call `i + 1`
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls()
            .windows(2)
            .filter_map(|pair| {
                pair[0]
                    .finished_at
                    .map(|end| pair[1].started_at.saturating_duration_since(end))
            })
            .collect()
    }
}

/// Succeeds immediately, optionally reporting a list of progress steps first
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    log: CallLog,
    progress: Vec<(i32, String)>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, percent: i32, message: impl Into<String>) -> Self {
        self.progress.push((percent, message.into()));
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        for (percent, message) in &self.progress {
            ctx.report_progress(*percent, message.clone()).await;
        }
        self.log.finish(call);
        Ok(())
    }
}

/// Always fails with the configured error
#[derive(Debug, Clone)]
pub struct FailingHandler {
    log: CallLog,
    error: TaskError,
}

impl FailingHandler {
    pub fn retryable(message: &str) -> Self {
        Self {
            log: CallLog::new(),
            error: TaskError::retryable(message),
        }
    }

    pub fn non_retryable(message: &str) -> Self {
        Self {
            log: CallLog::new(),
            error: TaskError::non_retryable(message),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for FailingHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        self.log.finish(call);
        Err(self.error.clone())
    }
}

/// Fails with a retryable error for the first `failures` calls, then succeeds
#[derive(Debug, Clone)]
pub struct FlakyHandler {
    log: CallLog,
    failures: usize,
    seen: Arc<AtomicUsize>,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            log: CallLog::new(),
            failures,
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        self.log.finish(call);
        if n < self.failures {
            Err(TaskError::retryable(format!("transient failure {}", n + 1)))
        } else {
            Ok(())
        }
    }
}

/// Sleeps for a fixed duration and ignores cancellation entirely
#[derive(Debug, Clone)]
pub struct SleepyHandler {
    log: CallLog,
    sleep: Duration,
}

impl SleepyHandler {
    pub fn new(sleep: Duration) -> Self {
        Self {
            log: CallLog::new(),
            sleep,
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for SleepyHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        tokio::time::sleep(self.sleep).await;
        self.log.finish(call);
        Ok(())
    }
}

/// Runs until its cancellation signal fires, then reports `Cancelled`
#[derive(Debug, Clone, Default)]
pub struct CooperativeHandler {
    log: CallLog,
}

impl CooperativeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for CooperativeHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        ctx.report_progress(10, "waiting for cancellation").await;
        ctx.cancelled().await;
        self.log.finish(call);
        Err(TaskError::Cancelled)
    }
}

/// Panics on every call
#[derive(Debug, Clone, Default)]
pub struct PanickingHandler {
    log: CallLog,
}

impl PanickingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        self.log.finish(call);
        panic!("handler blew up on task {}", ctx.task_id());
    }
}

/// A latch shared by [`GateHandler`]s; closed until [`Gate::open`]
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let open = *rx.borrow_and_update();
            if open || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks on a [`Gate`] and tracks how many calls are inside at once
#[derive(Debug, Clone)]
pub struct GateHandler {
    log: CallLog,
    gate: Gate,
    inside: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl GateHandler {
    pub fn new(gate: Gate) -> Self {
        Self {
            log: CallLog::new(),
            gate,
            inside: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Calls currently blocked on the gate
    pub fn inside(&self) -> usize {
        self.inside.load(Ordering::SeqCst)
    }

    /// Highest concurrency observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for GateHandler {
    async fn execute(&self, ctx: TaskContext, params: Value) -> TaskResult {
        let call = self.log.start(&ctx, &params);
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::select! {
            _ = self.gate.wait() => {}
            _ = ctx.cancelled() => {
                self.inside.fetch_sub(1, Ordering::SeqCst);
                self.log.finish(call);
                return Err(TaskError::Cancelled);
            }
        }

        self.inside.fetch_sub(1, Ordering::SeqCst);
        self.log.finish(call);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_opens_once_for_all_waiters() {
        tokio_test::block_on(async {
            let gate = Gate::new();
            assert!(!gate.is_open());

            let waiter = gate.clone();
            let opener = gate.clone();
            let (_, ()) = tokio::join!(waiter.wait(), async move { opener.open() });
            assert!(gate.is_open());
            // Already open: returns immediately
            gate.wait().await;
        });
    }

    #[test]
    fn test_empty_log_has_no_gaps() {
        let log = CallLog::new();
        assert_eq!(log.count(), 0);
        assert!(log.gaps().is_empty());
    }
}
