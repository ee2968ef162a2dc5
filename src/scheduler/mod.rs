//! The two-tier scrape scheduler and its supporting pieces.

pub mod progress;
pub mod run;
pub mod stop;
pub mod tasks;
mod watchdog;

pub use progress::{ProgressMonitor, StuckCheck, StuckMetric};
pub use run::{Collaborators, Engine};
pub use stop::{StopFlag, StopReason};
pub use tasks::{DetailTaskRegistry, DetailTaskStatus, TaskTicket};
