//! UI-facing notifications emitted by the batch controller.
//!
//! The presentation layer re-renders from
//! [`BatchController::snapshot`](crate::controller::BatchController::snapshot);
//! these updates tell it when and what changed.

use aura_core::types::JobId;
use serde::Serialize;

use crate::state::{BatchPhase, ProgressSnapshot};

/// A change to the batch state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchUpdate {
    /// The batch moved between phases.
    PhaseChanged { from: BatchPhase, to: BatchPhase },

    /// New progress figures for the active job.
    Progress(ProgressSnapshot),

    /// The server confirmed a pause or resume.
    PauseChanged { paused: bool },

    /// A job finished; `completed` of `expected` are done.
    ItemCompleted {
        job_id: JobId,
        filename: String,
        completed: usize,
        expected: usize,
    },

    /// Every submitted job has completed. Emitted once per batch.
    ReadyToExport { completed: usize },

    /// A job was cancelled; the batch was retired.
    JobCancelled { job_id: JobId },

    /// A job failed on the server; the batch was retired.
    JobFailed { job_id: JobId, message: String },

    /// The upload command failed; nothing was kept.
    UploadFailed { message: String },
}
