//! Bounded-concurrency task limiter.
//!
//! Admits at most `capacity` tasks at a time; excess callers queue FIFO on
//! the underlying semaphore. Queued tasks are never cancelled here, they
//! observe the shared stop flag cooperatively once admitted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// FIFO concurrency limiter.
///
/// Two instances drive the scheduler: one for tier-A zone discovery and one
/// for page-bound tier-B detail extraction. Detail tasks that do not need a
/// browser page bypass the limiter entirely.
#[derive(Clone)]
pub struct TaskLimiter {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    capacity: usize,
}

impl TaskLimiter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Run `task` once admitted. The permit is held for the task's whole
    /// lifetime, success or failure.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // The semaphore is never closed; if it somehow is, running
                // unthrottled beats dropping the task.
                tracing::error!("limiter semaphore closed unexpectedly, running unthrottled");
                None
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        let output = task.await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        output
    }

    /// Tasks currently admitted.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for TaskLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLimiter")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_at_most_capacity() {
        let limiter = TaskLimiter::new(3);
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        let now = limiter.active();
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn returns_task_output() {
        let limiter = TaskLimiter::new(1);
        let out = limiter.run(async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }
}
