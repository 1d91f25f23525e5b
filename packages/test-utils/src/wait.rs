//! Polling helpers for asynchronous assertions

use std::future::Future;
use std::time::Duration;

use reel_scheduler::{Dispatcher, TaskFilter, TaskInstance, TaskStatus};
use uuid::Uuid;

/// Poll interval used by every helper in this module
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `check` until it returns `Some`, panicking after `timeout`
pub async fn eventually<T, F, Fut>(timeout: Duration, what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out after {:?} waiting for {}", timeout, what);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until task `id` has `status`
pub async fn wait_for_status(
    dispatcher: &Dispatcher,
    id: Uuid,
    status: TaskStatus,
    timeout: Duration,
) -> TaskInstance {
    let what = format!("task {} to reach {}", id, status);
    eventually(timeout, &what, move || async move {
        dispatcher
            .get(id)
            .await
            .ok()
            .filter(|task| task.status == status)
    })
    .await
}

/// Wait until task `id` is in any terminal status
pub async fn wait_for_terminal(dispatcher: &Dispatcher, id: Uuid, timeout: Duration) -> TaskInstance {
    let what = format!("task {} to finish", id);
    eventually(timeout, &what, move || async move {
        dispatcher
            .get(id)
            .await
            .ok()
            .filter(|task| task.is_terminal())
    })
    .await
}

/// Wait until the retry chain rooted at `chain_id` has `attempts` instances,
/// the last of which is terminal; returns them in attempt order
pub async fn wait_for_chain(
    dispatcher: &Dispatcher,
    chain_id: Uuid,
    attempts: usize,
    timeout: Duration,
) -> Vec<TaskInstance> {
    let what = format!("retry chain {} to settle after {} attempts", chain_id, attempts);
    eventually(timeout, &what, move || async move {
        let mut chain = dispatcher
            .list(&TaskFilter::new().retry_chain(chain_id))
            .await
            .ok()?;
        chain.sort_by_key(|task| task.attempt);
        let settled = chain.len() == attempts && chain.last().map_or(false, |t| t.is_terminal());
        settled.then_some(chain)
    })
    .await
}
