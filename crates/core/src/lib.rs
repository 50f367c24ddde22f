//! Shared domain types for the AuraTranscribe batch client.
//!
//! Holds the job identifier type, the per-job status state with its
//! validated transitions, and the wire event names emitted by the
//! transcription server.

pub mod error;
pub mod job_events;
pub mod job_status;
pub mod types;
