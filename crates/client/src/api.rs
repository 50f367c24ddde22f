//! REST API client for the transcription server's HTTP endpoints.
//!
//! Wraps upload, job control (pause/resume/cancel), export, transcript
//! retrieval, the native save dialog bridge and the model status check
//! using [`reqwest`]. Every command treats any non-2xx status as a
//! failure; response bodies are only read where the caller needs data.

use std::path::{Path, PathBuf};

use aura_core::types::JobId;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

/// HTTP client for the transcription server.
#[derive(Debug, Clone)]
pub struct TranscriptionApi {
    client: reqwest::Client,
    api_url: String,
}

/// A file to submit for transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Name reported to the server (and used for export suggestions).
    pub filename: String,
    /// Location on the local disk.
    pub path: PathBuf,
}

impl UploadFile {
    /// Describe a local file, taking the filename from the path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { filename, path }
    }
}

/// Response of both upload endpoints.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Server-issued job ids, in submission order.
    pub job_ids: Vec<JobId>,
}

/// How completed transcripts are written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// One file per job.
    Separate,
    /// All jobs concatenated into one file.
    Merged,
}

impl std::str::FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "separate" => Ok(Self::Separate),
            "merged" => Ok(Self::Merged),
            other => Err(format!("unknown export mode `{other}`")),
        }
    }
}

/// Export command shared by both modes.
///
/// A `Separate` request carries exactly one job; a `Merged` request
/// carries every job to concatenate. Success is an HTTP 2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub job_ids: Vec<JobId>,
    pub mode: ExportMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

impl ExportRequest {
    /// Export one job to `target_path`.
    pub fn single(job_id: impl Into<JobId>, target_path: impl Into<String>) -> Self {
        Self {
            job_ids: vec![job_id.into()],
            mode: ExportMode::Separate,
            target_path: Some(target_path.into()),
        }
    }

    /// Export all `job_ids` into one file at `target_path`.
    pub fn merged(job_ids: Vec<JobId>, target_path: impl Into<String>) -> Self {
        Self {
            job_ids,
            mode: ExportMode::Merged,
            target_path: Some(target_path.into()),
        }
    }
}

/// Response of `GET /api/ui/save_dialog`.
#[derive(Debug, Deserialize)]
struct SaveDialogResponse {
    #[serde(default)]
    path: Option<String>,
}

/// Response of `GET /api/transcription/{id}/text`.
#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Response of `GET /api/model/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelStatus {
    pub downloaded: bool,
    #[serde(default)]
    pub ram_check: Option<RamCheck>,
}

/// Memory check reported alongside the model status.
#[derive(Debug, Clone, Deserialize)]
pub struct RamCheck {
    pub sufficient: bool,
    pub available_gb: f64,
    pub required_gb: f64,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Reading a local file for upload failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request is not well-formed for its endpoint.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Job control commands sharing the `POST /api/transcription/{id}/<action>` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Pause,
    Resume,
    Cancel,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}

impl TranscriptionApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:47821`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful to share timeouts and connection pooling).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload files as `multipart/form-data` (field `files`).
    pub async fn upload_files(&self, files: &[UploadFile]) -> Result<Vec<JobId>, ApiError> {
        let mut form = Form::new();
        for file in files {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|source| ApiError::Io {
                    path: file.path.clone(),
                    source,
                })?;
            form = form.part("files", Part::bytes(bytes).file_name(file.filename.clone()));
        }

        let response = self
            .client
            .post(self.url("/api/transcription/upload"))
            .multipart(form)
            .send()
            .await?;

        let body: UploadResponse = Self::parse_response(response).await?;
        Ok(body.job_ids)
    }

    /// Submit files by absolute path; the server reads them in place.
    pub async fn upload_paths(&self, paths: &[&Path]) -> Result<Vec<JobId>, ApiError> {
        let paths: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let body = serde_json::json!({ "paths": paths });

        let response = self
            .client
            .post(self.url("/api/transcription/upload_paths"))
            .json(&body)
            .send()
            .await?;

        let body: UploadResponse = Self::parse_response(response).await?;
        Ok(body.job_ids)
    }

    /// Pause, resume or cancel a job.
    pub async fn job_action(&self, job_id: &str, action: JobAction) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!(
                "/api/transcription/{job_id}/{}",
                action.as_str()
            )))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Fetch the transcript text of a job (empty while not yet available).
    pub async fn transcript(&self, job_id: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/transcription/{job_id}/text")))
            .send()
            .await?;

        let body: TranscriptResponse = Self::parse_response(response).await?;
        Ok(body.text.unwrap_or_default())
    }

    /// Run an export command.
    ///
    /// Single-job `Separate` requests go to `POST /api/export/single`,
    /// `Merged` requests to `POST /api/export/batch`.
    pub async fn export(&self, request: &ExportRequest) -> Result<(), ApiError> {
        match request.mode {
            ExportMode::Separate => {
                let (job_id, target_path) = match (request.job_ids.as_slice(), &request.target_path)
                {
                    ([job_id], Some(target_path)) => (job_id, target_path),
                    _ => {
                        return Err(ApiError::InvalidRequest(
                            "separate export needs exactly one job and a target path".into(),
                        ))
                    }
                };
                self.export_single(job_id, target_path).await
            }
            ExportMode::Merged => {
                if request.target_path.is_none() {
                    return Err(ApiError::InvalidRequest(
                        "merged export needs a target path".into(),
                    ));
                }
                self.export_batch(request).await
            }
        }
    }

    /// `POST /api/export/single?job_id=&target_path=`.
    pub async fn export_single(&self, job_id: &str, target_path: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/api/export/single"))
            .query(&[("job_id", job_id), ("target_path", target_path)])
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `POST /api/export/batch` with a JSON [`ExportRequest`] body.
    pub async fn export_batch(&self, request: &ExportRequest) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/api/export/batch"))
            .json(request)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Ask the native save dialog for a target path.
    ///
    /// Returns `None` when the user dismissed the dialog.
    pub async fn save_dialog(&self, filename: &str) -> Result<Option<PathBuf>, ApiError> {
        let response = self
            .client
            .get(self.url("/api/ui/save_dialog"))
            .query(&[("filename", filename)])
            .send()
            .await?;

        let body: SaveDialogResponse = Self::parse_response(response).await?;
        Ok(body
            .path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from))
    }

    /// Probe whether the speech model is installed.
    pub async fn model_status(&self) -> Result<ModelStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/api/model/status"))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn upload_file_takes_name_from_path() {
        let file = UploadFile::from_path("/recordings/2024/interview.m4a");
        assert_eq!(file.filename, "interview.m4a");
        assert_eq!(file.path, PathBuf::from("/recordings/2024/interview.m4a"));
    }

    #[test]
    fn export_mode_parses_case_insensitively() {
        assert_eq!("Merged".parse::<ExportMode>(), Ok(ExportMode::Merged));
        assert_eq!(" separate ".parse::<ExportMode>(), Ok(ExportMode::Separate));
        assert!("zip".parse::<ExportMode>().is_err());
    }

    #[test]
    fn merged_request_serializes_wire_shape() {
        let request = ExportRequest::merged(vec!["a".into(), "b".into()], "/tmp/all.txt");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["job_ids"], serde_json::json!(["a", "b"]));
        assert_eq!(json["mode"], "merged");
        assert_eq!(json["target_path"], "/tmp/all.txt");
    }

    #[test]
    fn request_without_target_omits_field() {
        let request = ExportRequest {
            job_ids: vec!["a".into()],
            mode: ExportMode::Merged,
            target_path: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("target_path").is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = TranscriptionApi::new("http://127.0.0.1:47821/");
        assert_eq!(api.api_url(), "http://127.0.0.1:47821");
        assert_eq!(
            api.url("/api/model/status"),
            "http://127.0.0.1:47821/api/model/status"
        );
    }

    #[tokio::test]
    async fn separate_export_with_many_jobs_is_rejected_locally() {
        let api = TranscriptionApi::new("http://127.0.0.1:9");
        let request = ExportRequest {
            job_ids: vec!["a".into(), "b".into()],
            mode: ExportMode::Separate,
            target_path: Some("/tmp/a.txt".into()),
        };
        assert_matches!(api.export(&request).await, Err(ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn merged_export_without_target_is_rejected_locally() {
        let api = TranscriptionApi::new("http://127.0.0.1:9");
        let request = ExportRequest {
            job_ids: vec!["a".into()],
            mode: ExportMode::Merged,
            target_path: None,
        };
        assert_matches!(api.export(&request).await, Err(ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_before_any_request() {
        let api = TranscriptionApi::new("http://127.0.0.1:9");
        let files = [UploadFile::from_path("/definitely/not/here.wav")];
        assert_matches!(api.upload_files(&files).await, Err(ApiError::Io { .. }));
    }

    #[test]
    fn model_status_parses_optional_ram_check() {
        let status: ModelStatus = serde_json::from_str(r#"{"downloaded":true}"#).unwrap();
        assert!(status.downloaded);
        assert!(status.ram_check.is_none());

        let status: ModelStatus = serde_json::from_str(
            r#"{"downloaded":false,"ram_check":{"sufficient":false,"available_gb":3.5,"required_gb":4}}"#,
        )
        .unwrap();
        let ram = status.ram_check.unwrap();
        assert!(!ram.sufficient);
        assert!((ram.required_gb - 4.0).abs() < f64::EPSILON);
    }
}
