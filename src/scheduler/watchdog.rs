//! Run watchdog.
//!
//! A single background task ticking every five seconds, checking in order:
//! wall-clock budget, stuck progress, external cancellation. Any hit sets
//! the shared stop flag; the tasks themselves wind down cooperatively.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::JobStatus;

use super::run::RunContext;
use super::stop::StopReason;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) fn spawn(ctx: Arc<RunContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if ctx.stop.is_set() {
                break;
            }

            if ctx.started.elapsed() > ctx.config.job_timeout {
                warn!(
                    "wall-clock budget exhausted after {:?}",
                    ctx.started.elapsed()
                );
                ctx.stop.trigger(StopReason::WallClockTimeout);
                break;
            }

            let check = ctx.monitor.check();
            if check.is_stuck {
                if ctx.stop.trigger(StopReason::Stuck) {
                    warn!(
                        "no progress on {:?} for {:?}, stopping",
                        check.metric, check.stuck_for
                    );
                    if let Err(error) = ctx.job.update_status(JobStatus::StuckTimeout).await {
                        debug!("status update failed: {error:#}");
                    }
                }
                break;
            }

            match ctx.job.status().await {
                Some(JobStatus::Failed) => {
                    info!("job record reports failed, cancelling run");
                    ctx.stop.trigger(StopReason::Cancelled);
                    break;
                }
                None => {
                    info!("job record gone, cancelling run");
                    ctx.stop.trigger(StopReason::Cancelled);
                    break;
                }
                _ => {}
            }
        }
    })
}
