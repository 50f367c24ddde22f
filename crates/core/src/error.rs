use crate::job_status::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
