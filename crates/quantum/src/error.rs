use backend::BackendError;
use thiserror::Error;
use tn::TnError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuantumError {
    /// Bad gate matrix, bad channel, or out-of-range targets.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested representation would not fit the memory ceiling.
    #[error("{what} for {num_qubits} qubits needs {required} bytes, ceiling is {ceiling}")]
    ResourceExceeded {
        what: &'static str,
        num_qubits: usize,
        required: u128,
        ceiling: u64,
    },

    #[error("truncation budget exceeded: accumulated {accumulated:.3e} > threshold {threshold:.3e}")]
    TruncationBudgetExceeded { accumulated: f64, threshold: f64 },

    #[error(transparent)]
    Tn(TnError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl QuantumError {
    /// Only a budget overrun can be retried without changing the input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TruncationBudgetExceeded { .. })
    }
}

impl From<TnError> for QuantumError {
    fn from(err: TnError) -> Self {
        match err {
            TnError::TruncationBudgetExceeded { accumulated, threshold } => {
                Self::TruncationBudgetExceeded { accumulated, threshold }
            }
            TnError::SiteOutOfRange { site, len } => {
                Self::Validation(format!("qubit {} out of range for {} qubits", site, len))
            }
            TnError::RepeatedSite(site) => {
                Self::Validation(format!("qubit {} targeted twice", site))
            }
            TnError::Backend(e) => Self::Backend(e),
            other => Self::Tn(other),
        }
    }
}

pub type QuantumResult<T> = Result<T, QuantumError>;
