use crate::density::DensityMatrix;
use crate::error::QuantumResult;
use crate::gates::{check_qubits, C64};
use crate::state::QuantumState;
use crate::statevector::StateVector;

/// Full state reconstruction. `bloch_vector` is only set for one qubit.
#[derive(Clone, Debug)]
pub struct Tomography {
    pub density_matrix: DensityMatrix,
    pub purity: f64,
    pub bloch_vector: Option<[f64; 3]>,
}

pub fn measure_tomography(state: &QuantumState, ceiling: u64) -> QuantumResult<Tomography> {
    let density_matrix = match state {
        QuantumState::Mixed(rho) => rho.clone(),
        other => {
            let psi = StateVector::unnormalized(other.amplitudes(ceiling)?)?;
            DensityMatrix::from_pure(&psi, ceiling)?
        }
    };
    let bloch_vector = (density_matrix.num_qubits() == 1).then(|| bloch_vector(&density_matrix));
    Ok(Tomography {
        purity: density_matrix.purity(),
        bloch_vector,
        density_matrix,
    })
}

/// `(<X>, <Y>, <Z>)` of a single-qubit density matrix.
pub fn bloch_vector(rho: &DensityMatrix) -> [f64; 3] {
    bloch_from([[rho.get(0, 0), rho.get(0, 1)], [rho.get(1, 0), rho.get(1, 1)]])
}

/// Bloch vector of one qubit's reduced state.
pub fn qubit_bloch_vector(state: &QuantumState, qubit: usize) -> QuantumResult<[f64; 3]> {
    check_qubits(&[qubit], state.num_qubits())?;
    match state {
        QuantumState::Pure(psi) => Ok(bloch_vector(&DensityMatrix::reduced_from_pure(psi, &[qubit])?)),
        QuantumState::Mixed(rho) => Ok(bloch_vector(&rho.partial_trace(&[qubit])?)),
        QuantumState::Mps(mps) => Ok(bloch_from(mps.site_density(qubit)?)),
    }
}

fn bloch_from(rho: [[C64; 2]; 2]) -> [f64; 3] {
    [
        2.0 * rho[0][1].re,
        -2.0 * rho[0][1].im,
        (rho[0][0] - rho[1][1]).re,
    ]
}
