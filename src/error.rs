use thiserror::Error;

/// Error taxonomy for the batch and scheduling processors.
///
/// Inside the batch and tick loops, capability failures are recorded on the
/// affected article or schedule and never surface here. `Capability` is only
/// returned by synchronous paths such as settings regeneration.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Capability(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type JobResult<T> = Result<T, JobError>;
