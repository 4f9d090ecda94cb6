// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue of in-flight asynchronous lifecycle operations.

use std::future::{Future, poll_fn};
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span};

/// Owned set of background lifecycle tasks.
///
/// Callers never await individual tasks; [`TaskQueue::wait_idle`] drains
/// everything spawned so far, including tasks spawned while it waits.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        // A panic while holding the lock leaves the set itself intact.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `future` on the runtime, tagged with an operation label and instance id.
    pub fn spawn<F>(&self, operation: &'static str, instance_id: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("lifecycle", operation, instance_id = %instance_id);
        let mut tasks = self.lock();

        // Reap finished tasks so the set does not grow without bound.
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }

        tasks.spawn(future.instrument(span));
        debug!(operation, instance_id = %instance_id, in_flight = tasks.len(), "Queued lifecycle task");
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Wait until every queued task has finished.
    ///
    /// The tasks stay owned by the queue while waiting, so dropping this
    /// future leaves them running.
    pub async fn wait_idle(&self) {
        while let Some(result) = poll_fn(|cx| self.lock().poll_join_next(cx)).await {
            log_join_result(result);
        }
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Lifecycle task panicked");
        } else {
            debug!(error = %e, "Lifecycle task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue() {
        let queue = TaskQueue::new();
        queue.wait_idle().await;
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_drains_all_tasks() {
        let queue = TaskQueue::new();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let done = done.clone();
            queue.spawn("test", &format!("instance-{i}"), async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_idle_leaves_tasks_running() {
        let queue = TaskQueue::new();
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        queue.spawn("test", "slow", async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let waited = tokio::time::timeout(Duration::from_millis(10), queue.wait_idle()).await;
        assert!(waited.is_err());
        assert_eq!(queue.in_flight(), 1);

        queue.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_survives_panicking_task() {
        let queue = TaskQueue::new();
        queue.spawn("test", "boom", async {
            panic!("task failure");
        });
        queue.wait_idle().await;
        assert_eq!(queue.in_flight(), 0);
    }
}
