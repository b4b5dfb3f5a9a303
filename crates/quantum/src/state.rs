use backend::ComputeBackend;
use rng::ONDRng;
use serde::{Deserialize, Serialize};
use tn::{BudgetConfig, Mps, Truncation};
use tracing::info;

use crate::density::DensityMatrix;
use crate::error::{QuantumError, QuantumResult};
use crate::gates::{Gate, C64};
use crate::mps_ops::{apply_gate_mps, apply_noise_trajectory_mps};
use crate::noise::KrausChannel;
use crate::statevector::StateVector;
use crate::{check_ceiling, dense_bytes};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationKind {
    Dense,
    Density,
    Mps,
}

/// Emitted whenever `apply_noise` changes the representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepresentationChange {
    pub from: RepresentationKind,
    pub to: RepresentationKind,
}

/// A quantum state in one of its three representations.
#[derive(Clone, Debug)]
pub enum QuantumState {
    Pure(StateVector),
    Mixed(DensityMatrix),
    Mps(Mps),
}

impl QuantumState {
    pub fn zero_dense(num_qubits: usize, ceiling: u64) -> QuantumResult<Self> {
        Ok(Self::Pure(StateVector::new(num_qubits, ceiling)?))
    }

    pub fn zero_mps(num_qubits: usize, trunc: Truncation, budget: BudgetConfig) -> QuantumResult<Self> {
        if num_qubits == 0 {
            return Err(QuantumError::Validation("an MPS needs at least one qubit".into()));
        }
        Ok(Self::Mps(Mps::new_zero(num_qubits, trunc, budget)))
    }

    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::Pure(_) => RepresentationKind::Dense,
            Self::Mixed(_) => RepresentationKind::Density,
            Self::Mps(_) => RepresentationKind::Mps,
        }
    }

    pub fn num_qubits(&self) -> usize {
        match self {
            Self::Pure(psi) => psi.num_qubits(),
            Self::Mixed(rho) => rho.num_qubits(),
            Self::Mps(mps) => mps.len(),
        }
    }

    /// Accumulated truncation error; zero for exact representations.
    pub fn truncation_error(&self) -> f64 {
        match self {
            Self::Mps(mps) => mps.truncation_error(),
            _ => 0.0,
        }
    }

    /// Squared norm of a pure state, or the trace of a mixed one.
    pub fn norm(&self) -> f64 {
        match self {
            Self::Pure(psi) => psi.norm_sqr(),
            Self::Mixed(rho) => rho.trace().re,
            Self::Mps(mps) => mps.norm_sqr(),
        }
    }

    /// Apply a validated unitary. Returns the weight discarded by MPS
    /// truncation, zero otherwise.
    pub fn apply_gate(
        &mut self,
        backend: &dyn ComputeBackend,
        gate: &Gate,
        targets: &[usize],
    ) -> QuantumResult<f64> {
        match self {
            Self::Pure(psi) => psi.apply_gate(gate, targets).map(|_| 0.0),
            Self::Mixed(rho) => rho.apply_gate(gate, targets).map(|_| 0.0),
            Self::Mps(mps) => apply_gate_mps(mps, backend, gate, targets),
        }
    }

    /// Apply `channel` exactly. Pure and MPS states are first promoted to
    /// a density matrix; the promotion is reported back and logged.
    pub fn apply_noise(
        &mut self,
        channel: &KrausChannel,
        targets: &[usize],
        ceiling: u64,
    ) -> QuantumResult<Option<RepresentationChange>> {
        channel.check_targets(targets, self.num_qubits())?;
        let change = match self {
            Self::Mixed(_) => None,
            Self::Pure(psi) => {
                let rho = DensityMatrix::from_pure(psi, ceiling)?;
                Some(self.promote(rho))
            }
            Self::Mps(mps) => {
                let n = mps.len();
                check_ceiling("state vector", n, dense_bytes(n), ceiling)?;
                let psi = StateVector::unnormalized(mps.to_dense())?;
                let rho = DensityMatrix::from_pure(&psi, ceiling)?;
                Some(self.promote(rho))
            }
        };
        if let Self::Mixed(rho) = self {
            rho.apply_channel(channel, targets)?;
        }
        Ok(change)
    }

    fn promote(&mut self, rho: DensityMatrix) -> RepresentationChange {
        let change = RepresentationChange {
            from: self.kind(),
            to: RepresentationKind::Density,
        };
        info!(
            from = ?change.from,
            to = ?change.to,
            num_qubits = rho.num_qubits(),
            "noise switched state representation"
        );
        *self = Self::Mixed(rho);
        change
    }

    /// Apply `channel` by sampling one Kraus branch. Returns the chosen
    /// branch, or `None` for a mixed state, which evolves exactly.
    pub fn apply_noise_sampled(
        &mut self,
        backend: &dyn ComputeBackend,
        channel: &KrausChannel,
        targets: &[usize],
        rng: &mut ONDRng,
    ) -> QuantumResult<Option<usize>> {
        match self {
            Self::Pure(psi) => psi.apply_noise_trajectory(channel, targets, rng).map(Some),
            Self::Mps(mps) => apply_noise_trajectory_mps(mps, backend, channel, targets, rng).map(Some),
            Self::Mixed(rho) => rho.apply_channel(channel, targets).map(|_| None),
        }
    }

    /// Basis-state probabilities in big-endian order.
    pub fn probabilities(&self, ceiling: u64) -> QuantumResult<Vec<f64>> {
        match self {
            Self::Pure(psi) => Ok(psi.probabilities()),
            Self::Mixed(rho) => Ok(rho.probabilities()),
            Self::Mps(mps) => {
                let n = mps.len();
                check_ceiling("state vector", n, dense_bytes(n), ceiling)?;
                Ok(mps.to_dense().iter().map(|a| a.norm_sqr()).collect())
            }
        }
    }

    /// Dense amplitudes of a pure or MPS state.
    pub fn amplitudes(&self, ceiling: u64) -> QuantumResult<Vec<C64>> {
        match self {
            Self::Pure(psi) => Ok(psi.amplitudes().to_vec()),
            Self::Mps(mps) => {
                let n = mps.len();
                check_ceiling("state vector", n, dense_bytes(n), ceiling)?;
                Ok(mps.to_dense())
            }
            Self::Mixed(_) => Err(QuantumError::Validation(
                "a mixed state has no amplitude vector".into(),
            )),
        }
    }

    /// Fidelity against another state; at least one side must be pure or MPS.
    pub fn fidelity(&self, other: &QuantumState, ceiling: u64) -> QuantumResult<f64> {
        match (self, other) {
            (Self::Mixed(rho), pure) | (pure, Self::Mixed(rho)) => {
                let psi = StateVector::unnormalized(pure.amplitudes(ceiling)?)?;
                rho.fidelity_with_pure(&psi)
            }
            _ => {
                let a = StateVector::unnormalized(self.amplitudes(ceiling)?)?;
                let b = StateVector::unnormalized(other.amplitudes(ceiling)?)?;
                a.fidelity(&b)
            }
        }
    }
}
