//! WebSocket event name constants for job lifecycle notifications.
//!
//! Every server frame carries one of these in its mandatory `event`
//! field. The typed parser in `aura-client` maps each name to a payload
//! shape.

/// A job moved to a new status (`extracting`, `transcribing`, `paused`, ...).
pub const EVENT_STATUS_CHANGE: &str = "status_change";

/// Per-job audio progress plus batch position and ETA.
pub const EVENT_PROGRESS: &str = "progress";

/// A job finished and its transcript is available.
pub const EVENT_COMPLETED: &str = "completed";

/// Speech model download progress.
pub const EVENT_MODEL_DOWNLOAD: &str = "model_download";

/// Speech model download finished and validated.
pub const EVENT_MODEL_DOWNLOAD_COMPLETE: &str = "model_download_complete";
