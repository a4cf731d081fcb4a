//! Bounded fire-and-forget task pool.
//!
//! Detached work (the copy-from-source path) is submitted here so a slow
//! external fetch never blocks a request task. Submission hands ownership
//! of the task to the pool; callers get no result channel back, and the
//! only observable outcome is the eventual record status.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Concurrency ceiling matching the original request-handling pool.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded-concurrency pool for detached ingestion tasks.
#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
        }
    }

    /// Submit a task. Excess submissions queue until a slot frees up.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.tracker.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                // Pool is shutting down; the startup sweep reconciles any
                // record this task would have updated.
                return;
            };
            fut.await;
        });
    }

    /// Stop accepting tasks and wait for in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.semaphore.close();
        self.tracker.wait().await;
    }

    /// Number of tasks currently tracked, for test assertions.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_tasks_run_to_completion() {
        let pool = TaskPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_capacity_bounds_concurrency() {
        let pool = TaskPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.shutdown().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
