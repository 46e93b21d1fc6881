#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Job {0} is not ready for download")]
    JobNotReady(String),

    #[error("Insufficient credits: {required} minutes required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
