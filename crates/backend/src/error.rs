use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// A participating rank could not be reached.
    #[error("rank {rank} is unreachable during {operation}")]
    CommunicationFailure {
        rank: usize,
        operation: &'static str,
    },

    #[error("invalid axes: {0}")]
    InvalidAxes(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid exchange pattern: {0}")]
    Pattern(String),

    #[error("backend '{0}' is not available on this host")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
