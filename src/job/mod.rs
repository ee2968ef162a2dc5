//! Job record contract.
//!
//! The persistent job record lives outside this crate; the engine only
//! needs to poll its status for cancellation, flip it on stuck detection,
//! and stream progress updates through it. Update failures are logged and
//! never fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status values of the external job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    StuckTimeout,
    Delayed,
    Paused,
}

/// Stuck-detection details attached to a progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckDetection {
    pub reason: String,
    pub stuck_for_ms: u64,
}

/// One progress update streamed to the job handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub percentage: f64,
    pub records_collected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck_detection: Option<StuckDetection>,
    /// Present on the terminal event of a completed run, absent on
    /// cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Interface to the external job record.
#[async_trait]
pub trait JobHandle: Send + Sync {
    /// Current status, `None` when the record has disappeared.
    async fn status(&self) -> Option<JobStatus>;

    /// Update the record status.
    async fn update_status(&self, status: JobStatus) -> anyhow::Result<()>;

    /// Stream a progress event. Idempotent on the caller side.
    async fn update_progress(&self, event: ProgressEvent) -> anyhow::Result<()>;
}

/// Job handle that accepts everything and reports an always-active job.
///
/// Used by the demo binary and by tests that exercise the scheduler without
/// a queue behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJobHandle;

#[async_trait]
impl JobHandle for NullJobHandle {
    async fn status(&self) -> Option<JobStatus> {
        Some(JobStatus::Active)
    }

    async fn update_status(&self, _status: JobStatus) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_progress(&self, _event: ProgressEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
