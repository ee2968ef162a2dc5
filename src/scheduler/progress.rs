//! Progress and stuck detection.
//!
//! Tracks when the record count and the reported percentage last changed.
//! Either metric standing still past its timeout marks the run stuck, and
//! the flag stays set for the rest of the run.

use std::time::Duration;
use tokio::time::Instant;

/// Which metric tripped stuck detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckMetric {
    Records,
    Percentage,
}

impl StuckMetric {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Percentage => "percentage",
        }
    }
}

/// Result of one stuck check.
#[derive(Debug, Clone, Copy)]
pub struct StuckCheck {
    pub is_stuck: bool,
    pub metric: Option<StuckMetric>,
    pub stuck_for: Duration,
}

struct MonitorState {
    last_records: usize,
    last_percentage: f64,
    records_updated: Instant,
    percentage_updated: Instant,
    stuck: Option<StuckMetric>,
}

/// Per-run progress monitor.
pub struct ProgressMonitor {
    records_timeout: Duration,
    percentage_timeout: Duration,
    state: parking_lot::Mutex<MonitorState>,
}

impl ProgressMonitor {
    #[must_use]
    pub fn new(records_timeout: Duration, percentage_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            records_timeout,
            percentage_timeout,
            state: parking_lot::Mutex::new(MonitorState {
                last_records: 0,
                last_percentage: 0.0,
                records_updated: now,
                percentage_updated: now,
                stuck: None,
            }),
        }
    }

    /// Record a progress observation, advancing timestamps only for values
    /// that actually changed, then check for stuckness.
    pub fn update(&self, records: usize, percentage: f64) -> StuckCheck {
        let now = Instant::now();
        let mut state = self.state.lock();
        if records != state.last_records {
            state.last_records = records;
            state.records_updated = now;
        }
        if (percentage - state.last_percentage).abs() > f64::EPSILON {
            state.last_percentage = percentage;
            state.percentage_updated = now;
        }
        Self::evaluate(
            &mut state,
            now,
            self.records_timeout,
            self.percentage_timeout,
        )
    }

    /// Check without new observations; used by the watchdog.
    pub fn check(&self) -> StuckCheck {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::evaluate(
            &mut state,
            now,
            self.records_timeout,
            self.percentage_timeout,
        )
    }

    fn evaluate(
        state: &mut MonitorState,
        now: Instant,
        records_timeout: Duration,
        percentage_timeout: Duration,
    ) -> StuckCheck {
        let records_for = now.saturating_duration_since(state.records_updated);
        let percentage_for = now.saturating_duration_since(state.percentage_updated);

        if state.stuck.is_none() {
            if records_for > records_timeout {
                state.stuck = Some(StuckMetric::Records);
            } else if percentage_for > percentage_timeout {
                state.stuck = Some(StuckMetric::Percentage);
            }
        }

        match state.stuck {
            Some(metric) => StuckCheck {
                is_stuck: true,
                metric: Some(metric),
                stuck_for: match metric {
                    StuckMetric::Records => records_for,
                    StuckMetric::Percentage => percentage_for,
                },
            },
            None => StuckCheck {
                is_stuck: false,
                metric: None,
                stuck_for: Duration::ZERO,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stuck_after_records_timeout() {
        let monitor = ProgressMonitor::new(Duration::from_secs(10), Duration::from_secs(60));

        assert!(!monitor.update(1, 5.0).is_stuck);
        tokio::time::advance(Duration::from_secs(11)).await;

        let check = monitor.check();
        assert!(check.is_stuck);
        assert_eq!(check.metric, Some(StuckMetric::Records));
        assert!(check.stuck_for >= Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_the_clock() {
        let monitor = ProgressMonitor::new(Duration::from_secs(10), Duration::from_secs(60));

        monitor.update(1, 5.0);
        tokio::time::advance(Duration::from_secs(8)).await;
        monitor.update(2, 10.0);
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(!monitor.check().is_stuck);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_values_do_not_advance_timestamps() {
        let monitor = ProgressMonitor::new(Duration::from_secs(10), Duration::from_secs(60));

        monitor.update(1, 5.0);
        tokio::time::advance(Duration::from_secs(6)).await;
        monitor.update(1, 5.0);
        tokio::time::advance(Duration::from_secs(6)).await;

        // 12s with the same values: stuck despite the recent update call.
        assert!(monitor.update(1, 5.0).is_stuck);
    }

    #[tokio::test(start_paused = true)]
    async fn percentage_stalls_alone_trip_detection() {
        let monitor = ProgressMonitor::new(Duration::from_secs(600), Duration::from_secs(20));

        monitor.update(0, 1.0);
        tokio::time::advance(Duration::from_secs(21)).await;

        let check = monitor.check();
        assert!(check.is_stuck);
        assert_eq!(check.metric, Some(StuckMetric::Percentage));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_is_sticky() {
        let monitor = ProgressMonitor::new(Duration::from_secs(10), Duration::from_secs(60));

        monitor.update(1, 5.0);
        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(monitor.check().is_stuck);

        // Later progress does not clear it for this run.
        let check = monitor.update(2, 10.0);
        assert!(check.is_stuck);
    }
}
