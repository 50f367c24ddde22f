//! Export of completed transcripts.
//!
//! Separate mode walks the completed items one at a time through an
//! [`ExportPipeline`]: ask the [`SaveDialog`] for a path, export that job,
//! wait the step delay, move on. The native dialog is a single-instance
//! resource, so steps never overlap. Merged mode asks once and issues one
//! export for every job.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aura_client::api::{ExportMode, ExportRequest};
use aura_core::types::JobId;
use chrono::NaiveDate;
use serde::Serialize;

use crate::backend::{JobBackend, SaveDialog};
use crate::error::BatchError;

/// Default pause between two separate-mode export steps.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(400);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs steps strictly one after another with a fixed delay in between.
#[derive(Debug, Clone, Copy)]
pub struct ExportPipeline {
    step_delay: Duration,
}

impl ExportPipeline {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    pub fn step_delay(&self) -> Duration {
        self.step_delay
    }

    /// Run `step` for each item in order. Each step completes before the
    /// delay starts; there is no delay before the first step.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, mut step: F) -> Vec<Fut::Output>
    where
        F: FnMut(usize, T) -> Fut,
        Fut: Future,
    {
        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 && !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            outputs.push(step(index, item).await);
        }
        outputs
    }
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_DELAY)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A job whose export command failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportFailure {
    pub job_id: JobId,
    pub filename: String,
    pub error: String,
}

/// Outcome of one export run. Dialog cancellations are skips, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub mode: ExportMode,
    /// Jobs whose export command succeeded.
    pub succeeded: Vec<JobId>,
    /// Jobs left out because the user dismissed the dialog.
    pub skipped: Vec<JobId>,
    pub failed: Vec<ExportFailure>,
}

impl ExportReport {
    fn new(mode: ExportMode) -> Self {
        Self {
            mode,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }
}

enum StepOutcome {
    Exported(JobId),
    Skipped(JobId),
    Failed(ExportFailure),
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Suggested name for a single job's transcript: the audio file's stem
/// with a `.txt` extension.
pub fn transcript_filename(audio_filename: &str) -> String {
    let stem = Path::new(audio_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "transcript".to_string());
    format!("{stem}.txt")
}

/// Suggested name for a merged export made on `date`.
pub fn merged_filename(date: NaiveDate) -> String {
    format!("transcripts_{}.txt", date.format("%Y-%m-%d"))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Export runs
// ---------------------------------------------------------------------------

/// Export each `(job_id, filename)` pair to its own file.
///
/// A failed dialog or export command is recorded in the report and the
/// run continues with the next item.
pub async fn export_separate(
    backend: &dyn JobBackend,
    dialog: &dyn SaveDialog,
    pipeline: &ExportPipeline,
    items: Vec<(JobId, String)>,
) -> ExportReport {
    let total = items.len();
    let outcomes = pipeline
        .run(items, |index, (job_id, filename)| async move {
            let suggested = transcript_filename(&filename);
            let target: PathBuf = match dialog.request_path(&suggested).await {
                Ok(Some(target)) => target,
                Ok(None) => {
                    tracing::info!(%job_id, step = index + 1, total, "Save dialog dismissed, skipping");
                    return StepOutcome::Skipped(job_id);
                }
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "Save dialog failed");
                    return StepOutcome::Failed(ExportFailure {
                        job_id,
                        filename,
                        error: e.to_string(),
                    });
                }
            };

            let request = ExportRequest::single(job_id.clone(), path_string(&target));
            match backend.export(&request).await {
                Ok(()) => {
                    tracing::info!(%job_id, target = %target.display(), "Transcript exported");
                    StepOutcome::Exported(job_id)
                }
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "Export command failed");
                    StepOutcome::Failed(ExportFailure {
                        job_id,
                        filename,
                        error: e.to_string(),
                    })
                }
            }
        })
        .await;

    let mut report = ExportReport::new(ExportMode::Separate);
    for outcome in outcomes {
        match outcome {
            StepOutcome::Exported(job_id) => report.succeeded.push(job_id),
            StepOutcome::Skipped(job_id) => report.skipped.push(job_id),
            StepOutcome::Failed(failure) => report.failed.push(failure),
        }
    }
    report
}

/// Export every job into one file named after `date`.
pub async fn export_merged(
    backend: &dyn JobBackend,
    dialog: &dyn SaveDialog,
    job_ids: Vec<JobId>,
    date: NaiveDate,
) -> Result<ExportReport, BatchError> {
    let mut report = ExportReport::new(ExportMode::Merged);

    let suggested = merged_filename(date);
    let Some(target) = dialog
        .request_path(&suggested)
        .await
        .map_err(BatchError::Export)?
    else {
        tracing::info!(jobs = job_ids.len(), "Save dialog dismissed, merged export skipped");
        report.skipped = job_ids;
        return Ok(report);
    };

    let request = ExportRequest::merged(job_ids, path_string(&target));
    backend.export(&request).await.map_err(BatchError::Export)?;

    tracing::info!(jobs = request.job_ids.len(), target = %target.display(), "Merged transcript exported");
    report.succeeded = request.job_ids;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_filename_replaces_extension() {
        assert_eq!(transcript_filename("interview.m4a"), "interview.txt");
        assert_eq!(transcript_filename("take.2.wav"), "take.2.txt");
        assert_eq!(transcript_filename("notes"), "notes.txt");
        assert_eq!(transcript_filename(""), "transcript.txt");
    }

    #[test]
    fn merged_filename_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(merged_filename(date), "transcripts_2024-03-07.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_spaces_steps_without_leading_delay() {
        let pipeline = ExportPipeline::new(Duration::from_millis(400));
        let start = tokio::time::Instant::now();

        let offsets = pipeline
            .run(vec!['a', 'b', 'c'], |_, _| async move { start.elapsed() })
            .await;

        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[tokio::test]
    async fn pipeline_preserves_order() {
        let pipeline = ExportPipeline::new(Duration::ZERO);
        let out = pipeline.run(vec![3, 1, 2], |i, v| async move { (i, v) }).await;
        assert_eq!(out, vec![(0, 3), (1, 1), (2, 2)]);
    }
}
