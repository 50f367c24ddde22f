//! Recording fakes for the controller's collaborators.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use aura_batch::backend::{JobBackend, SaveDialog};
use aura_batch::controller::{BatchController, ControllerConfig};
use aura_client::api::{ApiError, ExportRequest, JobAction, UploadFile};
use aura_client::messages::{CompletedEvent, StatusChangeEvent};
use aura_core::job_status::JobStatus;

/// A command the controller sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upload(Vec<String>),
    Action(String, JobAction),
    Export(ExportRequest),
    Transcript(String),
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "unavailable".into(),
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    fail_upload: Mutex<bool>,
    fail_actions: Mutex<bool>,
    fail_exports_for: Mutex<HashSet<String>>,
    /// Locked by a test to hold uploads in flight.
    pub upload_gate: tokio::sync::Mutex<()>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exports(&self) -> Vec<ExportRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Export(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn actions(&self) -> Vec<(String, JobAction)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Action(job_id, action) => Some((job_id, action)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_upload(&self) {
        *self.fail_upload.lock().unwrap() = true;
    }

    pub fn fail_actions(&self) {
        *self.fail_actions.lock().unwrap() = true;
    }

    pub fn fail_export_for(&self, job_id: &str) {
        self.fail_exports_for.lock().unwrap().insert(job_id.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn upload(&self, files: &[UploadFile]) -> Result<Vec<String>, ApiError> {
        let _held = self.upload_gate.lock().await;
        self.record(Call::Upload(files.iter().map(|f| f.filename.clone()).collect()));
        if *self.fail_upload.lock().unwrap() {
            return Err(server_error());
        }
        Ok((1..=files.len()).map(|n| format!("job-{n}")).collect())
    }

    async fn job_action(&self, job_id: &str, action: JobAction) -> Result<(), ApiError> {
        self.record(Call::Action(job_id.to_string(), action));
        if *self.fail_actions.lock().unwrap() {
            return Err(server_error());
        }
        Ok(())
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), ApiError> {
        self.record(Call::Export(request.clone()));
        let failing = self.fail_exports_for.lock().unwrap();
        if request.job_ids.iter().any(|id| failing.contains(id)) {
            return Err(server_error());
        }
        Ok(())
    }

    async fn transcript(&self, job_id: &str) -> Result<String, ApiError> {
        self.record(Call::Transcript(job_id.to_string()));
        Ok(format!("text of {job_id}"))
    }
}

// ---------------------------------------------------------------------------
// FakeDialog
// ---------------------------------------------------------------------------

/// Answers save-dialog requests from a script; grants `/exports/<name>`
/// once the script runs out.
#[derive(Default)]
pub struct FakeDialog {
    answers: Mutex<VecDeque<Option<PathBuf>>>,
    requests: Mutex<Vec<(String, Instant)>>,
}

impl FakeDialog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(answers: Vec<Option<&str>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(PathBuf::from)).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn suggested_names(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl SaveDialog for FakeDialog {
    async fn request_path(&self, suggested_name: &str) -> Result<Option<PathBuf>, ApiError> {
        self.requests
            .lock()
            .unwrap()
            .push((suggested_name.to_string(), Instant::now()));
        let scripted = self.answers.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| Some(PathBuf::from(format!("/exports/{suggested_name}")))))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn controller(
    backend: &Arc<FakeBackend>,
    dialog: &Arc<FakeDialog>,
) -> Arc<BatchController> {
    BatchController::new(
        backend.clone(),
        dialog.clone(),
        ControllerConfig {
            export_step_delay: Duration::from_millis(400),
        },
    )
}

pub fn files(names: &[&str]) -> Vec<UploadFile> {
    names
        .iter()
        .map(|n| UploadFile::from_path(format!("/audio/{n}")))
        .collect()
}

pub fn completed(job_id: &str, filename: &str) -> CompletedEvent {
    CompletedEvent {
        job_id: job_id.into(),
        filename: filename.into(),
    }
}

pub fn status(job_id: &str, status: JobStatus) -> StatusChangeEvent {
    StatusChangeEvent {
        job_id: job_id.into(),
        status,
        error_message: None,
    }
}

/// Submit `names` and complete every job, leaving the batch ready to export.
pub async fn ready_batch(controller: &BatchController, names: &[&str]) -> Vec<String> {
    let job_ids = controller.submit(files(names)).await.unwrap();
    for (job_id, name) in job_ids.iter().zip(names) {
        controller.handle_completed(&completed(job_id, name));
    }
    job_ids
}
