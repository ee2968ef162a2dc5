//! Tier-B detail task registry.
//!
//! Every scheduled detail task is tracked here so the scheduler can keep
//! `results + active tasks` under the record cap. Tasks that have run past
//! the stuck timeout stop counting toward that budget but are not
//! cancelled. Tickets resolve their task on drop, so a panicking task
//! still leaves the registry consistent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of one detail task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Stuck,
}

struct DetailTask {
    #[allow(dead_code)]
    url: String,
    started: Instant,
    status: DetailTaskStatus,
}

/// Registry of in-flight detail tasks.
pub struct DetailTaskRegistry {
    stuck_timeout: Duration,
    next_id: AtomicU64,
    tasks: parking_lot::Mutex<HashMap<u64, DetailTask>>,
}

impl DetailTaskRegistry {
    #[must_use]
    pub fn new(stuck_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            stuck_timeout,
            next_id: AtomicU64::new(0),
            tasks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Track a new task. The returned ticket must accompany the task for
    /// its whole lifetime.
    pub fn register(self: &Arc<Self>, url: &str) -> TaskTicket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().insert(
            id,
            DetailTask {
                url: url.to_string(),
                started: Instant::now(),
                status: DetailTaskStatus::Pending,
            },
        );
        TaskTicket {
            registry: Arc::clone(self),
            id,
            resolved: false,
        }
    }

    /// Tasks still counting toward the scheduling budget.
    ///
    /// Prunes finished tasks and reclassifies overdue ones as stuck.
    pub fn active_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, task| {
            !matches!(
                task.status,
                DetailTaskStatus::Completed | DetailTaskStatus::Failed
            )
        });

        let mut active = 0;
        for task in tasks.values_mut() {
            if matches!(
                task.status,
                DetailTaskStatus::Pending | DetailTaskStatus::Active
            ) {
                if task.started.elapsed() >= self.stuck_timeout {
                    task.status = DetailTaskStatus::Stuck;
                } else {
                    active += 1;
                }
            }
        }
        active
    }

    /// All tracked tasks, stuck included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn set_status(&self, id: u64, status: DetailTaskStatus) {
        if let Some(task) = self.tasks.lock().get_mut(&id) {
            task.status = status;
        }
    }
}

/// Handle resolving one registered task.
pub struct TaskTicket {
    registry: Arc<DetailTaskRegistry>,
    id: u64,
    resolved: bool,
}

impl TaskTicket {
    /// Mark the task as actively extracting.
    pub fn activate(&self) {
        self.registry.set_status(self.id, DetailTaskStatus::Active);
    }

    pub fn complete(mut self) {
        self.registry.set_status(self.id, DetailTaskStatus::Completed);
        self.resolved = true;
    }

    pub fn fail(mut self) {
        self.registry.set_status(self.id, DetailTaskStatus::Failed);
        self.resolved = true;
    }
}

impl Drop for TaskTicket {
    fn drop(&mut self) {
        if !self.resolved {
            self.registry.set_status(self.id, DetailTaskStatus::Failed);
        }
    }
}
