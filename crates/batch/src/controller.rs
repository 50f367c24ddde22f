//! Batch job controller.
//!
//! [`BatchController`] is the only owner of batch state. Server events
//! arrive through handlers registered on an [`EventChannel`] by
//! [`BatchController::attach`]; user commands arrive as async method
//! calls. Job state changes only on server events: commands issue the
//! HTTP request and leave the state alone, except `submit`, which owns
//! the upload phase.
//!
//! State changes are computed under a short synchronous lock and the
//! resulting [`BatchUpdate`]s are published after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aura_client::api::{ExportMode, JobAction, UploadFile};
use aura_client::channel::EventChannel;
use aura_client::messages::{CompletedEvent, ProgressEvent, StatusChangeEvent};
use aura_core::types::JobId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::{JobBackend, SaveDialog};
use crate::error::BatchError;
use crate::events::BatchUpdate;
use crate::export::{self, ExportPipeline, ExportReport, DEFAULT_STEP_DELAY};
use crate::state::{BatchPhase, BatchSnapshot, BatchState};

/// Broadcast channel capacity for UI updates.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Controller policy.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pause between separate-mode export steps.
    pub export_step_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            export_step_delay: DEFAULT_STEP_DELAY,
        }
    }
}

/// Transcript text of one completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub job_id: JobId,
    pub filename: String,
    pub text: String,
}

/// Drives one batch at a time from upload to export.
pub struct BatchController {
    backend: Arc<dyn JobBackend>,
    dialog: Arc<dyn SaveDialog>,
    config: ControllerConfig,
    state: Mutex<BatchState>,
    update_tx: broadcast::Sender<BatchUpdate>,
    /// Held for the whole of an export run.
    export_guard: tokio::sync::Mutex<()>,
}

impl BatchController {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        dialog: Arc<dyn SaveDialog>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            dialog,
            config,
            state: Mutex::new(BatchState::default()),
            update_tx,
            export_guard: tokio::sync::Mutex::new(()),
        })
    }

    /// Register this controller's handlers on `channel`.
    ///
    /// Call once per channel; handlers are never removed.
    pub fn attach(self: &Arc<Self>, channel: &EventChannel) {
        let controller = Arc::clone(self);
        channel.on(move |event: &StatusChangeEvent| controller.handle_status(event));

        let controller = Arc::clone(self);
        channel.on(move |event: &ProgressEvent| controller.handle_progress(event));

        let controller = Arc::clone(self);
        channel.on(move |event: &CompletedEvent| controller.handle_completed(event));
    }

    /// Subscribe to UI updates.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchUpdate> {
        self.update_tx.subscribe()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        lock(&self.state).snapshot()
    }

    pub fn phase(&self) -> BatchPhase {
        lock(&self.state).phase()
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).is_paused()
    }

    pub fn active_job_id(&self) -> Option<JobId> {
        lock(&self.state).active_job_id().map(str::to_string)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ---- commands ----

    /// Upload `files` as a new batch.
    ///
    /// On failure the batch returns to idle with nothing kept.
    pub async fn submit(&self, files: Vec<UploadFile>) -> Result<Vec<JobId>, BatchError> {
        if files.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let generation = {
            let mut state = lock(&self.state);
            let phase = state.phase();
            if matches!(phase, BatchPhase::Uploading | BatchPhase::Processing { .. }) {
                return Err(BatchError::InvalidPhase {
                    operation: "submit",
                    phase,
                });
            }
            let (generation, updates) = state.begin_upload(files.len());
            drop(state);
            self.publish(updates);
            generation
        };

        tracing::info!(files = files.len(), "Uploading batch");

        match self.backend.upload(&files).await {
            Ok(job_ids) => {
                let updates = lock(&self.state).acknowledge_upload(generation, &job_ids, &files);
                match updates {
                    Some(updates) => {
                        tracing::info!(jobs = job_ids.len(), "Upload acknowledged");
                        self.publish(updates);
                    }
                    None => {
                        tracing::warn!(jobs = job_ids.len(), "Upload acknowledged after batch was discarded");
                    }
                }
                Ok(job_ids)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload failed");
                let updates = lock(&self.state).abort_upload(generation, e.to_string());
                if let Some(updates) = updates {
                    self.publish(updates);
                }
                Err(BatchError::Upload(e))
            }
        }
    }

    /// Ask the server to pause the active job. No-op without one.
    pub async fn pause(&self) -> Result<(), BatchError> {
        self.job_command(JobAction::Pause).await
    }

    /// Ask the server to resume the active job. No-op without one.
    pub async fn resume(&self) -> Result<(), BatchError> {
        self.job_command(JobAction::Resume).await
    }

    /// Ask the server to cancel the active job. No-op without one.
    ///
    /// The batch is retired when the `cancelled` status event arrives.
    pub async fn cancel(&self) -> Result<(), BatchError> {
        self.job_command(JobAction::Cancel).await
    }

    /// Export every completed job.
    pub async fn export_all(&self, mode: ExportMode) -> Result<ExportReport, BatchError> {
        let _guard = self
            .export_guard
            .try_lock()
            .map_err(|_| BatchError::ExportInProgress)?;

        let items = {
            let state = lock(&self.state);
            let phase = state.phase();
            if phase != BatchPhase::Exporting {
                return Err(BatchError::InvalidPhase {
                    operation: "export",
                    phase,
                });
            }
            state.completed_items()
        };
        if items.is_empty() {
            return Err(BatchError::NothingToExport);
        }

        tracing::info!(?mode, jobs = items.len(), "Exporting batch");

        let report = match mode {
            ExportMode::Separate => {
                let pipeline = ExportPipeline::new(self.config.export_step_delay);
                export::export_separate(
                    self.backend.as_ref(),
                    self.dialog.as_ref(),
                    &pipeline,
                    items,
                )
                .await
            }
            ExportMode::Merged => {
                let job_ids = items.into_iter().map(|(job_id, _)| job_id).collect();
                let today = chrono::Local::now().date_naive();
                export::export_merged(self.backend.as_ref(), self.dialog.as_ref(), job_ids, today)
                    .await?
            }
        };

        tracing::info!(
            ?mode,
            succeeded = report.success_count(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Export finished",
        );
        Ok(report)
    }

    /// Fetch transcript texts of the completed jobs, one at a time.
    pub async fn transcripts(&self) -> Result<Vec<Transcript>, BatchError> {
        let items = lock(&self.state).completed_items();
        let mut transcripts = Vec::with_capacity(items.len());
        for (job_id, filename) in items {
            let text = self
                .backend
                .transcript(&job_id)
                .await
                .map_err(|source| BatchError::Command {
                    action: "fetch transcript of",
                    job_id: job_id.clone(),
                    source,
                })?;
            transcripts.push(Transcript {
                job_id,
                filename,
                text,
            });
        }
        Ok(transcripts)
    }

    /// Discard the current batch and return to idle.
    pub fn new_batch(&self) {
        let updates = lock(&self.state).reset();
        tracing::info!("Batch discarded");
        self.publish(updates);
    }

    // ---- server events ----

    pub fn handle_status(&self, event: &StatusChangeEvent) {
        let updates = lock(&self.state).apply_status(event);
        self.publish(updates);
    }

    pub fn handle_progress(&self, event: &ProgressEvent) {
        let updates = lock(&self.state).apply_progress(event);
        self.publish(updates);
    }

    pub fn handle_completed(&self, event: &CompletedEvent) {
        let updates = lock(&self.state).apply_completed(event);
        self.publish(updates);
    }

    // ---- private helpers ----

    async fn job_command(&self, action: JobAction) -> Result<(), BatchError> {
        let Some(job_id) = self.active_job_id() else {
            tracing::debug!(action = action.as_str(), "No active job, ignoring command");
            return Ok(());
        };

        self.backend
            .job_action(&job_id, action)
            .await
            .map_err(|source| {
                tracing::warn!(%job_id, action = action.as_str(), error = %source, "Job command failed");
                BatchError::Command {
                    action: action.as_str(),
                    job_id: job_id.clone(),
                    source,
                }
            })?;

        tracing::info!(%job_id, action = action.as_str(), "Job command accepted");
        Ok(())
    }

    fn publish(&self, updates: Vec<BatchUpdate>) {
        for update in updates {
            // No subscribers is fine.
            let _ = self.update_tx.send(update);
        }
    }
}

fn lock(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
