use std::path::PathBuf;

use backend::BackendError;
use quantum::QuantumError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tn::TnError;

use crate::job::JobState;

/// Coarse classification used for propagation decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    ResourceExceeded,
    TruncationBudgetExceeded,
    ShapeMismatch,
    CommunicationFailure,
    Io,
    Cancelled,
}

impl ErrorKind {
    /// Only a truncation-budget overrun can be retried as is (with a
    /// larger bond dimension).
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::TruncationBudgetExceeded)
    }

    /// Kinds that take the whole job down.
    pub fn aborts_job(self) -> bool {
        matches!(
            self,
            Self::CommunicationFailure | Self::ResourceExceeded | Self::Cancelled
        )
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("checkpoint mesh shape {found:?} does not match current mesh {expected:?}")]
    ShapeMismatch { expected: Vec<usize>, found: Vec<usize> },

    #[error("ranks disagree on the step counter: {steps:?}")]
    StepDisagreement { steps: Vec<u64> },

    #[error("checkpoint boundary reached after {elapsed_ms} ms, timeout is {timeout_ms} ms")]
    CheckpointTimeout { elapsed_ms: u128, timeout_ms: u64 },

    #[error("checkpoint payload {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job cancelled at step {step}")]
    Cancelled { step: u64 },

    #[error("job cannot go from {from:?} to {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error(transparent)]
    Quantum(#[from] QuantumError),

    #[error(transparent)]
    Tn(#[from] TnError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ClusterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::StepDisagreement { .. } | Self::CheckpointTimeout { .. } => {
                ErrorKind::CommunicationFailure
            }
            Self::Corrupt { .. } | Self::Io { .. } | Self::Json(_) => ErrorKind::Io,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Quantum(e) => quantum_kind(e),
            Self::Tn(e) => tn_kind(e),
            Self::Backend(e) => backend_kind(e),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    /// Accumulated truncation error carried by a budget overrun.
    pub fn accumulated_error(&self) -> Option<f64> {
        match self {
            Self::Quantum(QuantumError::TruncationBudgetExceeded { accumulated, .. })
            | Self::Tn(TnError::TruncationBudgetExceeded { accumulated, .. }) => Some(*accumulated),
            _ => None,
        }
    }
}

fn quantum_kind(e: &QuantumError) -> ErrorKind {
    match e {
        QuantumError::ResourceExceeded { .. } => ErrorKind::ResourceExceeded,
        QuantumError::TruncationBudgetExceeded { .. } => ErrorKind::TruncationBudgetExceeded,
        QuantumError::Tn(e) => tn_kind(e),
        QuantumError::Backend(e) => backend_kind(e),
        _ => ErrorKind::Validation,
    }
}

fn tn_kind(e: &TnError) -> ErrorKind {
    match e {
        TnError::TruncationBudgetExceeded { .. } => ErrorKind::TruncationBudgetExceeded,
        TnError::Backend(e) => backend_kind(e),
        _ => ErrorKind::Validation,
    }
}

fn backend_kind(e: &BackendError) -> ErrorKind {
    match e {
        BackendError::CommunicationFailure { .. } => ErrorKind::CommunicationFailure,
        _ => ErrorKind::Validation,
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
