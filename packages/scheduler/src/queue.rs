//! Bounded FIFO queues, one per priority
//!
//! Queues hold task ids only; the store owns the rows. Workers wait on a
//! `Notify` instead of polling, and every push wakes at most one idle worker.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use reel_shared_config::QueueConfig;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::Priority;

/// Whether a push honours the backlog bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// New submissions: rejected with `QueueFull` at capacity
    Bounded,
    /// Retries and recovery: the submission was already admitted once
    Readmit,
}

pub(crate) struct TaskQueue {
    priority: Priority,
    capacity: usize,
    items: Mutex<VecDeque<Uuid>>,
    notify: Notify,
    /// Workers currently looping on this queue
    live_workers: AtomicUsize,
}

impl TaskQueue {
    pub fn new(priority: Priority, capacity: usize) -> Self {
        Self {
            priority,
            capacity,
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            live_workers: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    pub fn attach_worker(&self) {
        self.live_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn detach_worker(&self) {
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Append `id`, running `persist` while the queue is locked.
    ///
    /// Capacity is checked before `persist` runs, so a rejected submission
    /// leaves no row behind; holding the lock keeps persisted order and
    /// queue order identical.
    pub async fn enqueue<F>(&self, id: Uuid, admission: Admission, persist: F) -> SchedulerResult<()>
    where
        F: Future<Output = SchedulerResult<()>>,
    {
        let mut items = self.items.lock().await;
        if admission == Admission::Bounded && items.len() >= self.capacity {
            return Err(SchedulerError::QueueFull {
                queue: self.priority,
                capacity: self.capacity,
            });
        }
        persist.await?;
        items.push_back(id);
        drop(items);

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next id, or `None` once `shutdown` fires
    pub async fn pop(&self, shutdown: &CancellationToken) -> Option<Uuid> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            if let Some(id) = self.items.lock().await.pop_front() {
                return Some(id);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Drop a queued id (cancellation); returns whether it was present
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut items = self.items.lock().await;
        match items.iter().position(|queued| *queued == id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Snapshot of queued ids in dispatch order
    pub async fn snapshot(&self) -> Vec<Uuid> {
        self.items.lock().await.iter().copied().collect()
    }
}

/// The three priority queues
#[derive(Clone)]
pub(crate) struct QueueSet {
    high: Arc<TaskQueue>,
    default: Arc<TaskQueue>,
    background: Arc<TaskQueue>,
}

impl QueueSet {
    pub fn new(high: &QueueConfig, default: &QueueConfig, background: &QueueConfig) -> Self {
        Self {
            high: Arc::new(TaskQueue::new(Priority::High, high.capacity)),
            default: Arc::new(TaskQueue::new(Priority::Default, default.capacity)),
            background: Arc::new(TaskQueue::new(Priority::Background, background.capacity)),
        }
    }

    pub fn get(&self, priority: Priority) -> &Arc<TaskQueue> {
        match priority {
            Priority::High => &self.high,
            Priority::Default => &self.default,
            Priority::Background => &self.background,
        }
    }
}
