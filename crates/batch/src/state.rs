//! Batch state and its transitions.
//!
//! [`BatchState`] is plain data plus synchronous transition methods; it
//! never performs I/O. Each transition returns the [`BatchUpdate`]s it
//! caused so the controller can publish them after releasing its lock.
//!
//! Phases: `Idle -> Uploading -> Processing (paused or not) -> Exporting`,
//! with a return to `Idle` on a new batch, a failed upload, or a
//! cancelled/failed job.

use std::fmt;

use aura_client::api::UploadFile;
use aura_client::messages::{CompletedEvent, ProgressEvent, StatusChangeEvent};
use aura_core::job_status::JobStatus;
use aura_core::types::JobId;
use serde::Serialize;

use crate::events::BatchUpdate;

/// Fallback message when the server reports an error without one.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Phase of the batch as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchPhase {
    /// No batch in flight; ready for a new upload.
    Idle,
    /// Upload command sent, waiting for acknowledgement.
    Uploading,
    /// Jobs are being processed. `paused` mirrors the server's last
    /// pause/resume report for the active job.
    Processing { paused: bool },
    /// Every submitted job completed; ready to export.
    Exporting,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Uploading => f.write_str("uploading"),
            Self::Processing { paused: false } => f.write_str("processing"),
            Self::Processing { paused: true } => f.write_str("paused"),
            Self::Exporting => f.write_str("ready to export"),
        }
    }
}

/// One submitted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub job_id: JobId,
    /// Unknown when the server returned more jobs than files submitted.
    pub filename: Option<String>,
    pub status: JobStatus,
}

/// Latest progress figures for the active job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    /// Fraction of the current file transcribed (0.0 - 1.0).
    pub audio_progress: f64,
    pub batch_current: u32,
    pub batch_total: u32,
    pub estimated_remaining: f64,
}

impl ProgressSnapshot {
    /// Remaining time for the current file as `m:ss`.
    pub fn eta_label(&self) -> String {
        format_eta(self.estimated_remaining)
    }
}

impl From<&ProgressEvent> for ProgressSnapshot {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            job_id: event.job_id.clone(),
            audio_progress: event.audio_progress.clamp(0.0, 1.0),
            batch_current: event.batch_current,
            batch_total: event.batch_total,
            estimated_remaining: event.estimated_remaining,
        }
    }
}

/// Render seconds as `m:ss`; negative or non-finite input renders `0:00`.
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Serializable view of the batch for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSnapshot {
    pub phase: BatchPhase,
    pub expected_count: usize,
    pub items: Vec<BatchItem>,
    pub active_job_id: Option<JobId>,
    pub completed_job_ids: Vec<JobId>,
    pub completed_filenames: Vec<String>,
    pub is_paused: bool,
    /// `completed / expected`, 0.0 for an empty batch.
    pub completion_ratio: f64,
    pub progress: Option<ProgressSnapshot>,
    pub last_error: Option<String>,
}

/// All batch-scoped bookkeeping.
#[derive(Debug, Clone)]
pub struct BatchState {
    /// Bumped whenever batch-scoped state is discarded, so a command
    /// that started against an older batch can tell it is stale.
    generation: u64,
    phase: BatchPhase,
    expected_count: usize,
    items: Vec<BatchItem>,
    active_job_id: Option<JobId>,
    completed_job_ids: Vec<JobId>,
    completed_filenames: Vec<String>,
    progress: Option<ProgressSnapshot>,
    last_error: Option<String>,
    /// Events received while the upload was in flight.
    pending: Vec<PendingEvent>,
}

/// A server event held until the upload acknowledgement names the
/// batch's jobs.
#[derive(Debug, Clone)]
enum PendingEvent {
    Status(StatusChangeEvent),
    Progress(ProgressEvent),
    Completed(CompletedEvent),
}

impl Default for BatchState {
    fn default() -> Self {
        Self {
            generation: 0,
            phase: BatchPhase::Idle,
            expected_count: 0,
            items: Vec::new(),
            active_job_id: None,
            completed_job_ids: Vec::new(),
            completed_filenames: Vec::new(),
            progress: None,
            last_error: None,
            pending: Vec::new(),
        }
    }
}

impl BatchState {
    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    pub fn active_job_id(&self) -> Option<&str> {
        self.active_job_id.as_deref()
    }

    pub fn completed_job_ids(&self) -> &[JobId] {
        &self.completed_job_ids
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.phase, BatchPhase::Processing { paused: true })
    }

    pub fn item(&self, job_id: &str) -> Option<&BatchItem> {
        self.items.iter().find(|item| item.job_id == job_id)
    }

    /// Completed jobs paired with their filenames, in completion order.
    pub fn completed_items(&self) -> Vec<(JobId, String)> {
        self.completed_job_ids
            .iter()
            .cloned()
            .zip(self.completed_filenames.iter().cloned())
            .collect()
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.expected_count == 0 {
            0.0
        } else {
            self.completed_job_ids.len() as f64 / self.expected_count as f64
        }
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            phase: self.phase,
            expected_count: self.expected_count,
            items: self.items.clone(),
            active_job_id: self.active_job_id.clone(),
            completed_job_ids: self.completed_job_ids.clone(),
            completed_filenames: self.completed_filenames.clone(),
            is_paused: self.is_paused(),
            completion_ratio: self.completion_ratio(),
            progress: self.progress.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Discard all batch-scoped state and return to `Idle`.
    pub fn reset(&mut self) -> Vec<BatchUpdate> {
        let mut updates = Vec::new();
        let generation = self.generation + 1;
        let from = self.phase;
        *self = Self {
            generation,
            ..Self::default()
        };
        push_phase_change(&mut updates, from, BatchPhase::Idle);
        updates
    }

    /// Start a new batch of `expected_count` files.
    ///
    /// Returns the generation the upload belongs to.
    pub fn begin_upload(&mut self, expected_count: usize) -> (u64, Vec<BatchUpdate>) {
        let mut updates = self.reset();
        self.expected_count = expected_count;
        self.set_phase(BatchPhase::Uploading, &mut updates);
        (self.generation, updates)
    }

    /// The server accepted the upload of generation `generation`.
    ///
    /// Returns `None` when the batch was discarded in the meantime.
    pub fn acknowledge_upload(
        &mut self,
        generation: u64,
        job_ids: &[JobId],
        files: &[UploadFile],
    ) -> Option<Vec<BatchUpdate>> {
        if generation != self.generation || self.phase != BatchPhase::Uploading {
            return None;
        }
        if job_ids.len() != self.expected_count {
            tracing::warn!(
                expected = self.expected_count,
                received = job_ids.len(),
                "Server returned a different number of jobs than files submitted",
            );
        }

        self.items = job_ids
            .iter()
            .enumerate()
            .map(|(index, job_id)| BatchItem {
                job_id: job_id.clone(),
                filename: files.get(index).map(|f| f.filename.clone()),
                status: JobStatus::Queued,
            })
            .collect();

        let mut updates = Vec::new();
        self.set_phase(BatchPhase::Processing { paused: false }, &mut updates);

        // Replay what arrived during the upload; events for other jobs
        // are dropped by the membership check.
        for event in std::mem::take(&mut self.pending) {
            let replayed = match &event {
                PendingEvent::Status(event) => self.apply_status(event),
                PendingEvent::Progress(event) => self.apply_progress(event),
                PendingEvent::Completed(event) => self.apply_completed(event),
            };
            updates.extend(replayed);
        }
        self.check_ready(&mut updates);
        Some(updates)
    }

    /// The upload of generation `generation` failed; drop everything.
    pub fn abort_upload(&mut self, generation: u64, message: String) -> Option<Vec<BatchUpdate>> {
        if generation != self.generation {
            return None;
        }
        let mut updates = self.reset();
        self.last_error = Some(message.clone());
        updates.push(BatchUpdate::UploadFailed { message });
        Some(updates)
    }

    /// Apply a `status_change` event.
    pub fn apply_status(&mut self, event: &StatusChangeEvent) -> Vec<BatchUpdate> {
        let mut updates = Vec::new();
        if !self.admit(&event.job_id, || PendingEvent::Status(event.clone())) {
            return updates;
        }

        self.active_job_id = Some(event.job_id.clone());

        let Some(item) = self.item_mut(&event.job_id) else {
            return updates;
        };
        match item.status.transition(event.status) {
            Ok(next) => item.status = next,
            Err(e) => {
                tracing::warn!(job_id = %event.job_id, error = %e, "Rejected job status transition");
                return updates;
            }
        }

        match event.status {
            JobStatus::Paused => self.set_paused(true, &mut updates),
            JobStatus::Extracting | JobStatus::Transcribing => self.set_paused(false, &mut updates),
            JobStatus::Cancelled => {
                tracing::info!(job_id = %event.job_id, "Job cancelled, retiring batch");
                updates.push(BatchUpdate::JobCancelled {
                    job_id: event.job_id.clone(),
                });
                self.retire(&mut updates);
            }
            JobStatus::Errored => {
                let message = event
                    .error_message
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                tracing::warn!(job_id = %event.job_id, error = %message, "Job failed, retiring batch");
                self.last_error = Some(message.clone());
                updates.push(BatchUpdate::JobFailed {
                    job_id: event.job_id.clone(),
                    message,
                });
                self.retire(&mut updates);
            }
            JobStatus::Queued | JobStatus::Completed => {}
        }
        updates
    }

    /// Apply a `progress` event. Never changes job or batch phase.
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> Vec<BatchUpdate> {
        if !self.admit(&event.job_id, || PendingEvent::Progress(event.clone())) {
            return Vec::new();
        }
        self.active_job_id = Some(event.job_id.clone());
        let snapshot = ProgressSnapshot::from(event);
        self.progress = Some(snapshot.clone());
        vec![BatchUpdate::Progress(snapshot)]
    }

    /// Apply a `completed` event.
    ///
    /// A job already recorded as completed is a no-op, as is any
    /// completion beyond the number of files submitted.
    pub fn apply_completed(&mut self, event: &CompletedEvent) -> Vec<BatchUpdate> {
        let mut updates = Vec::new();
        if !self.admit(&event.job_id, || PendingEvent::Completed(event.clone())) {
            return updates;
        }
        if self.completed_job_ids.contains(&event.job_id) {
            tracing::debug!(job_id = %event.job_id, "Duplicate completion ignored");
            return updates;
        }
        if self.completed_job_ids.len() >= self.expected_count {
            tracing::warn!(
                job_id = %event.job_id,
                expected = self.expected_count,
                "Completion beyond batch size ignored",
            );
            return updates;
        }

        let Some(item) = self.item_mut(&event.job_id) else {
            return updates;
        };
        if let Err(e) = item.status.transition(JobStatus::Completed) {
            tracing::warn!(job_id = %event.job_id, error = %e, "Rejected completion");
            return updates;
        }
        item.status = JobStatus::Completed;
        item.filename = Some(event.filename.clone());

        self.completed_job_ids.push(event.job_id.clone());
        self.completed_filenames.push(event.filename.clone());

        tracing::info!(
            job_id = %event.job_id,
            filename = %event.filename,
            completed = self.completed_job_ids.len(),
            expected = self.expected_count,
            "Job completed",
        );
        updates.push(BatchUpdate::ItemCompleted {
            job_id: event.job_id.clone(),
            filename: event.filename.clone(),
            completed: self.completed_job_ids.len(),
            expected: self.expected_count,
        });
        self.check_ready(&mut updates);
        updates
    }

    // ---- private helpers ----

    /// Move `Processing` to `Exporting` once every job completed.
    fn check_ready(&mut self, updates: &mut Vec<BatchUpdate>) {
        let processing = matches!(self.phase, BatchPhase::Processing { .. });
        if processing && self.completed_job_ids.len() == self.expected_count {
            self.set_phase(BatchPhase::Exporting, updates);
            updates.push(BatchUpdate::ReadyToExport {
                completed: self.completed_job_ids.len(),
            });
        }
    }

    fn set_paused(&mut self, paused: bool, updates: &mut Vec<BatchUpdate>) {
        if let BatchPhase::Processing { paused: current } = self.phase {
            if current != paused {
                self.phase = BatchPhase::Processing { paused };
                updates.push(BatchUpdate::PauseChanged { paused });
            }
        }
    }

    fn set_phase(&mut self, to: BatchPhase, updates: &mut Vec<BatchUpdate>) {
        let from = self.phase;
        self.phase = to;
        push_phase_change(updates, from, to);
    }

    /// Whether an event for `job_id` applies to the batch now.
    ///
    /// While the upload is in flight the batch's job ids are unknown, so
    /// the event is held for replay. Afterwards only the acknowledged
    /// jobs belong to the batch; the server keeps running jobs of a
    /// retired batch and their events must not leak into this one.
    fn admit(&mut self, job_id: &str, hold: impl FnOnce() -> PendingEvent) -> bool {
        match self.phase {
            BatchPhase::Idle => {
                tracing::debug!(job_id, "Ignoring event for retired batch");
                false
            }
            BatchPhase::Uploading => {
                self.pending.push(hold());
                false
            }
            BatchPhase::Processing { .. } | BatchPhase::Exporting => {
                let member = self.item(job_id).is_some();
                if !member {
                    tracing::debug!(job_id, "Ignoring event for job outside this batch");
                }
                member
            }
        }
    }

    /// Return to `Idle` after a job was cancelled or failed.
    fn retire(&mut self, updates: &mut Vec<BatchUpdate>) {
        self.active_job_id = None;
        self.progress = None;
        self.set_phase(BatchPhase::Idle, updates);
    }

    fn item_mut(&mut self, job_id: &str) -> Option<&mut BatchItem> {
        self.items.iter_mut().find(|item| item.job_id == job_id)
    }
}

fn push_phase_change(updates: &mut Vec<BatchUpdate>, from: BatchPhase, to: BatchPhase) {
    if from != to {
        tracing::info!(%from, %to, "Batch phase changed");
        updates.push(BatchUpdate::PhaseChanged { from, to });
    }
}
