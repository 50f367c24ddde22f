//! Seams between the batch controller and the server.
//!
//! [`JobBackend`] carries the HTTP commands and [`SaveDialog`] asks the
//! user where to write an export. [`HttpBackend`] implements both over
//! [`TranscriptionApi`]; tests substitute recording fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aura_client::api::{ApiError, ExportRequest, JobAction, TranscriptionApi, UploadFile};
use aura_core::types::JobId;

/// Commands the controller issues against the transcription server.
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// Upload files for transcription; returns job ids in submission order.
    async fn upload(&self, files: &[UploadFile]) -> Result<Vec<JobId>, ApiError>;

    /// Pause, resume or cancel a job.
    async fn job_action(&self, job_id: &str, action: JobAction) -> Result<(), ApiError>;

    /// Export completed transcripts.
    async fn export(&self, request: &ExportRequest) -> Result<(), ApiError>;

    /// Fetch a job's transcript text.
    async fn transcript(&self, job_id: &str) -> Result<String, ApiError>;
}

/// Asks where an export should be written.
#[async_trait]
pub trait SaveDialog: Send + Sync + 'static {
    /// `Ok(None)` means the user dismissed the dialog.
    async fn request_path(&self, suggested_name: &str) -> Result<Option<PathBuf>, ApiError>;
}

/// How files reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadMode {
    /// Send file contents as multipart form data.
    #[default]
    Multipart,
    /// Send absolute paths; the server reads the files itself.
    Paths,
}

/// [`JobBackend`] and [`SaveDialog`] over the server's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    api: TranscriptionApi,
    upload_mode: UploadMode,
}

impl HttpBackend {
    pub fn new(api: TranscriptionApi, upload_mode: UploadMode) -> Self {
        Self { api, upload_mode }
    }

    pub fn api(&self) -> &TranscriptionApi {
        &self.api
    }
}

#[async_trait]
impl JobBackend for HttpBackend {
    async fn upload(&self, files: &[UploadFile]) -> Result<Vec<JobId>, ApiError> {
        match self.upload_mode {
            UploadMode::Multipart => self.api.upload_files(files).await,
            UploadMode::Paths => {
                let paths: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();
                self.api.upload_paths(&paths).await
            }
        }
    }

    async fn job_action(&self, job_id: &str, action: JobAction) -> Result<(), ApiError> {
        self.api.job_action(job_id, action).await
    }

    async fn export(&self, request: &ExportRequest) -> Result<(), ApiError> {
        self.api.export(request).await
    }

    async fn transcript(&self, job_id: &str) -> Result<String, ApiError> {
        self.api.transcript(job_id).await
    }
}

#[async_trait]
impl SaveDialog for HttpBackend {
    async fn request_path(&self, suggested_name: &str) -> Result<Option<PathBuf>, ApiError> {
        self.api.save_dialog(suggested_name).await
    }
}
