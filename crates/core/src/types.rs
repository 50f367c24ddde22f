/// Server-issued job identifier (UUID string in practice, opaque to the client).
pub type JobId = String;
