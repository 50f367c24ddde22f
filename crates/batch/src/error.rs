use aura_client::api::ApiError;
use aura_core::types::JobId;

use crate::state::BatchPhase;

/// Errors surfaced to callers of [`BatchController`](crate::controller::BatchController) commands.
///
/// Every variant leaves committed batch state as it was before the
/// command (an upload failure returns the batch to idle).
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Cannot submit an empty batch")]
    EmptyBatch,

    #[error("Cannot {operation} while the batch is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: BatchPhase,
    },

    #[error("Upload failed: {0}")]
    Upload(#[source] ApiError),

    #[error("Failed to {action} job {job_id}: {source}")]
    Command {
        action: &'static str,
        job_id: JobId,
        #[source]
        source: ApiError,
    },

    #[error("Export failed: {0}")]
    Export(#[source] ApiError),

    #[error("An export is already running")]
    ExportInProgress,

    #[error("No completed jobs to export")]
    NothingToExport,
}
