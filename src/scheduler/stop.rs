//! Shared cooperative stop flag.
//!
//! Monotonic: the first trigger wins and the flag never clears. Every task
//! in the run observes it at suspension points instead of being cancelled
//! from outside; the terminal drain awaits it to cut waiting short.

use std::sync::Arc;
use tokio::sync::watch;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The external job record was cancelled or disappeared.
    Cancelled,
    /// The record cap was reached.
    RecordCapReached,
    /// The wall-clock budget ran out.
    WallClockTimeout,
    /// The progress monitor reported no forward motion.
    Stuck,
}

struct StopInner {
    sender: watch::Sender<bool>,
    reason: parking_lot::Mutex<Option<StopReason>>,
}

/// Cloneable handle to the run's stop state.
#[derive(Clone)]
pub struct StopFlag {
    inner: Arc<StopInner>,
}

impl Default for StopFlag {
    fn default() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(StopInner {
                sender,
                reason: parking_lot::Mutex::new(None),
            }),
        }
    }
}

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` for the call that actually set it;
    /// later triggers keep the first reason.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
            self.inner.sender.send_replace(true);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.inner.sender.borrow()
    }

    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        *self.inner.reason.lock()
    }

    /// Resolve once the flag is set. Returns immediately when it already is.
    pub async fn wait(&self) {
        let mut receiver = self.inner.sender.subscribe();
        let _ = receiver.wait_for(|set| *set).await;
    }
}

impl std::fmt::Debug for StopFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopFlag")
            .field("set", &self.is_set())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_trigger_wins() {
        let stop = StopFlag::new();
        assert!(!stop.is_set());
        assert!(stop.trigger(StopReason::RecordCapReached));
        assert!(!stop.trigger(StopReason::Cancelled));
        assert!(stop.is_set());
        assert_eq!(stop.reason(), Some(StopReason::RecordCapReached));
    }

    #[test]
    fn clones_share_state() {
        let stop = StopFlag::new();
        let other = stop.clone();
        stop.trigger(StopReason::Stuck);
        assert!(other.is_set());
        assert_eq!(other.reason(), Some(StopReason::Stuck));
    }

    #[tokio::test]
    async fn wait_resolves_on_trigger() {
        let stop = StopFlag::new();
        let waiter = stop.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
            waiter.reason()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger(StopReason::WallClockTimeout);
        let reason = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait resolved")
            .expect("no panic");
        assert_eq!(reason, Some(StopReason::WallClockTimeout));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let stop = StopFlag::new();
        stop.trigger(StopReason::Cancelled);
        tokio::time::timeout(Duration::from_millis(100), stop.wait())
            .await
            .expect("immediate");
    }
}
