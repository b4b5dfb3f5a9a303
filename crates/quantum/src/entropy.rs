use backend::{ComputeBackend, DenseTensor};

use crate::density::DensityMatrix;
use crate::error::QuantumResult;
use crate::gates::check_qubits;
use crate::state::QuantumState;
use crate::statevector::StateVector;
use crate::{check_ceiling, dense_bytes};

/// `-Tr[rho_A log2 rho_A]` for the reduced state on `subsystem`.
///
/// For an MPS whose subsystem is a prefix or suffix of the chain the value
/// comes straight from the Schmidt spectrum at that bond.
pub fn entanglement_entropy(
    state: &QuantumState,
    subsystem: &[usize],
    backend: &dyn ComputeBackend,
    ceiling: u64,
) -> QuantumResult<f64> {
    let n = state.num_qubits();
    check_qubits(subsystem, n)?;
    match state {
        QuantumState::Pure(psi) => {
            von_neumann_entropy(&DensityMatrix::reduced_from_pure(psi, subsystem)?, backend)
        }
        QuantumState::Mixed(rho) => von_neumann_entropy(&rho.partial_trace(subsystem)?, backend),
        QuantumState::Mps(mps) => {
            if let Some(bond) = cut_bond(subsystem, n) {
                let mut gauge = mps.clone();
                return Ok(gauge.bond_entropy(backend, bond)?);
            }
            check_ceiling("state vector", n, dense_bytes(n), ceiling)?;
            let psi = StateVector::unnormalized(mps.to_dense())?;
            von_neumann_entropy(&DensityMatrix::reduced_from_pure(&psi, subsystem)?, backend)
        }
    }
}

/// `-Tr[rho log2 rho]`, using the singular values of a positive
/// semidefinite matrix as its eigenvalues.
pub fn von_neumann_entropy(rho: &DensityMatrix, backend: &dyn ComputeBackend) -> QuantumResult<f64> {
    let dim = rho.dim();
    let t = DenseTensor::new(vec![dim, dim], rho.data().to_vec())?;
    let f = backend.svd(&t, &[0], usize::MAX, 0.0)?;
    let total: f64 = f.s.iter().sum();
    let mut h = 0.0;
    for s in f.s {
        let p = s / total;
        if p > 1e-300 {
            h -= p * p.log2();
        }
    }
    Ok(h)
}

/// Bond index when `subsystem` is exactly `0..=k` or `k+1..n` for some
/// `k < n - 1`.
fn cut_bond(subsystem: &[usize], n: usize) -> Option<usize> {
    if subsystem.is_empty() || subsystem.len() >= n {
        return None;
    }
    let mut sorted = subsystem.to_vec();
    sorted.sort_unstable();
    let contiguous = sorted.windows(2).all(|w| w[1] == w[0] + 1);
    if !contiguous {
        return None;
    }
    if sorted[0] == 0 {
        Some(sorted[sorted.len() - 1])
    } else if sorted[sorted.len() - 1] == n - 1 {
        Some(sorted[0] - 1)
    } else {
        None
    }
}
