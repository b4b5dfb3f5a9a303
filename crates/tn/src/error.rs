use backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TnError {
    #[error("site {site} out of range for a chain of {len} sites")]
    SiteOutOfRange { site: usize, len: usize },

    #[error("two-site operation needs distinct sites, got {0} twice")]
    RepeatedSite(usize),

    /// Cumulative discarded weight went over the configured threshold.
    #[error("truncation budget exceeded: accumulated {accumulated:.3e} > threshold {threshold:.3e}")]
    TruncationBudgetExceeded { accumulated: f64, threshold: f64 },

    #[error("inconsistent chain: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type TnResult<T> = Result<T, TnError>;
