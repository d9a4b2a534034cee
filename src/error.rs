use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by timeline generation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimelineError {
    /// Reading points or writing events failed. Not retried internally.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Another run already holds the lock for this user.
    #[error("timeline generation already in progress for user {0}")]
    GenerationInProgress(String),

    /// Threshold values that cannot drive a run.
    #[error("invalid timeline configuration: {0}")]
    InvalidConfig(String),

    /// Internal consistency check failed, e.g. non-contiguous output.
    #[error("segmentation invariant violated: {0}")]
    SegmentationInvariantViolation(String),

    #[error("generation job {0} not found")]
    JobNotFound(Uuid),
}

impl TimelineError {
    /// Wrap a store failure, keeping the whole context chain in the message.
    pub fn storage(err: anyhow::Error) -> Self {
        TimelineError::StorageUnavailable(format!("{err:#}"))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, TimelineError::GenerationInProgress(_))
    }
}

pub type TimelineResult<T> = std::result::Result<T, TimelineError>;
