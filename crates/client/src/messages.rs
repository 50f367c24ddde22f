//! Server event types and parser.
//!
//! The transcription server sends JSON frames over WebSocket with the
//! shape `{"event": "<name>", ...payload fields}`. This module
//! deserializes them into a strongly-typed [`ServerEvent`] enum over a
//! closed set of [`EventKind`]s.

use aura_core::job_events::{
    EVENT_COMPLETED, EVENT_MODEL_DOWNLOAD, EVENT_MODEL_DOWNLOAD_COMPLETE, EVENT_PROGRESS,
    EVENT_STATUS_CHANGE,
};
use aura_core::job_status::JobStatus;
use aura_core::types::JobId;
use serde::{Deserialize, Serialize};

/// All known server events.
///
/// Deserialized via the internally-tagged `"event"` field; payload
/// fields sit next to the tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// A job changed status.
    #[serde(rename = "status_change")]
    StatusChange(StatusChangeEvent),

    /// Audio progress of the active job plus batch position.
    #[serde(rename = "progress")]
    Progress(ProgressEvent),

    /// A job finished successfully.
    #[serde(rename = "completed")]
    Completed(CompletedEvent),

    /// Speech model download progress.
    #[serde(rename = "model_download")]
    ModelDownload(ModelDownloadEvent),

    /// Speech model download finished.
    #[serde(rename = "model_download_complete")]
    ModelDownloadComplete(ModelDownloadCompleteEvent),
}

/// Discriminant of a [`ServerEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChange,
    Progress,
    Completed,
    ModelDownload,
    ModelDownloadComplete,
}

impl EventKind {
    /// Wire name carried in the `event` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => EVENT_STATUS_CHANGE,
            Self::Progress => EVENT_PROGRESS,
            Self::Completed => EVENT_COMPLETED,
            Self::ModelDownload => EVENT_MODEL_DOWNLOAD,
            Self::ModelDownloadComplete => EVENT_MODEL_DOWNLOAD_COMPLETE,
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            EVENT_STATUS_CHANGE => Some(Self::StatusChange),
            EVENT_PROGRESS => Some(Self::Progress),
            EVENT_COMPLETED => Some(Self::Completed),
            EVENT_MODEL_DOWNLOAD => Some(Self::ModelDownload),
            EVENT_MODEL_DOWNLOAD_COMPLETE => Some(Self::ModelDownloadComplete),
            _ => None,
        }
    }
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusChange(_) => EventKind::StatusChange,
            Self::Progress(_) => EventKind::Progress,
            Self::Completed(_) => EventKind::Completed,
            Self::ModelDownload(_) => EventKind::ModelDownload,
            Self::ModelDownloadComplete(_) => EventKind::ModelDownloadComplete,
        }
    }

    /// Job the event refers to, for job-scoped events.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::StatusChange(e) => Some(&e.job_id),
            Self::Progress(e) => Some(&e.job_id),
            Self::Completed(e) => Some(&e.job_id),
            Self::ModelDownload(_) | Self::ModelDownloadComplete(_) => None,
        }
    }
}

/// Payload for `status_change` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Present when `status` is `error`.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Payload for `progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Fraction of the current file transcribed (0.0 - 1.0).
    pub audio_progress: f64,
    /// 1-based position of the current file in the batch.
    pub batch_current: u32,
    pub batch_total: u32,
    /// Seconds left for the current file.
    pub estimated_remaining: f64,
}

/// Payload for `completed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub job_id: JobId,
    pub filename: String,
}

/// Payload for `model_download` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDownloadEvent {
    pub percent: f64,
    pub speed_mbps: f64,
    pub estimated_remaining_seconds: f64,
}

/// Payload for `model_download_complete` events (no fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDownloadCompleteEvent {}

/// A payload type that maps one-to-one onto an [`EventKind`].
///
/// Lets subscribers register handlers against the payload type and have
/// the compiler check the shape they receive.
pub trait TypedEvent: Send + Sync + 'static {
    const KIND: EventKind;

    /// Borrow the payload out of a [`ServerEvent`] of the matching kind.
    fn from_event(event: &ServerEvent) -> Option<&Self>;
}

macro_rules! impl_typed_event {
    ($payload:ty, $variant:ident) => {
        impl TypedEvent for $payload {
            const KIND: EventKind = EventKind::$variant;

            fn from_event(event: &ServerEvent) -> Option<&Self> {
                match event {
                    ServerEvent::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }
    };
}

impl_typed_event!(StatusChangeEvent, StatusChange);
impl_typed_event!(ProgressEvent, Progress);
impl_typed_event!(CompletedEvent, Completed);
impl_typed_event!(ModelDownloadEvent, ModelDownload);
impl_typed_event!(ModelDownloadCompleteEvent, ModelDownloadComplete);

/// Why a frame could not be turned into a [`ServerEvent`].
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Frame is not a JSON object: {0}")]
    InvalidJson(String),

    #[error("Frame has no string `event` field")]
    MissingEvent,

    #[error("Unknown event `{0}`")]
    UnknownEvent(String),

    #[error("Invalid `{event}` payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a WebSocket text frame into a typed event.
///
/// The `event` tag is checked before the payload so the caller can tell
/// a frame it should not know about apart from a broken one.
pub fn parse_message(text: &str) -> Result<ServerEvent, MessageError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| MessageError::InvalidJson(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(MessageError::InvalidJson("top-level value is not an object".into()));
    };

    let name = match object.get("event").and_then(|v| v.as_str()) {
        Some(name) => name.to_owned(),
        None => return Err(MessageError::MissingEvent),
    };

    if EventKind::from_name(&name).is_none() {
        return Err(MessageError::UnknownEvent(name));
    }

    serde_json::from_value(value)
        .map_err(|source| MessageError::InvalidPayload { event: name, source })
}
