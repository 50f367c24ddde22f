//! Per-job status and its transition rules.
//!
//! A job only moves forward through the pipeline:
//! `Queued -> Extracting -> Transcribing (<-> Paused) -> Completed | Cancelled | Errored`.
//! Stages may be skipped (events lost across a reconnect are never
//! replayed), but a job never moves backwards and a terminal status is
//! never overwritten.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Processing status of a single job.
///
/// Serialized with the server's lowercase names; `Errored` travels as
/// `"error"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Extracting,
    Transcribing,
    Paused,
    Completed,
    Cancelled,
    #[serde(rename = "error")]
    Errored,
}

impl JobStatus {
    /// `Completed`, `Cancelled` and `Errored` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }

    /// Pipeline stage. `Transcribing` and `Paused` share a stage so the
    /// pause/resume toggle is not treated as a backwards move.
    fn stage(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Extracting => 1,
            Self::Transcribing | Self::Paused => 2,
            Self::Completed | Self::Cancelled | Self::Errored => 3,
        }
    }

    /// Whether moving from `self` to `next` is legal.
    ///
    /// Re-reporting the current status is legal (a no-op), except that
    /// nothing is legal out of a terminal status other than itself.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        let (from, to) = (self.stage(), next.stage());
        to > from || (from == 2 && to == 2)
    }

    /// Validate and perform a transition, returning the new status.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Extracting => "extracting",
            Self::Transcribing => "transcribing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn forward_path_is_legal() {
        let mut status = JobStatus::Queued;
        for next in [
            JobStatus::Extracting,
            JobStatus::Transcribing,
            JobStatus::Paused,
            JobStatus::Transcribing,
            JobStatus::Completed,
        ] {
            status = status.transition(next).unwrap();
        }
        assert_eq!(status, JobStatus::Completed);
    }

    #[test]
    fn skipped_stages_are_legal() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Transcribing));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Extracting.can_transition_to(JobStatus::Paused));
    }

    #[test]
    fn backwards_moves_are_rejected() {
        assert!(!JobStatus::Transcribing.can_transition_to(JobStatus::Extracting));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn terminal_status_is_never_overwritten() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Cancelled,
            JobStatus::Errored,
        ] {
            assert_matches!(
                terminal.transition(JobStatus::Transcribing),
                Err(CoreError::InvalidTransition { .. })
            );
            assert!(terminal.can_transition_to(terminal));
        }
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn wire_names_match_server() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Errored).unwrap(),
            "\"error\""
        );
        let parsed: JobStatus = serde_json::from_str("\"transcribing\"").unwrap();
        assert_eq!(parsed, JobStatus::Transcribing);
        assert_eq!(JobStatus::Paused.to_string(), "paused");
    }
}
