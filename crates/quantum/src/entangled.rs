//! Closed-form entangled states used as correctness baselines.

use crate::error::{QuantumError, QuantumResult};
use crate::gates::C64;
use crate::statevector::StateVector;
use crate::{check_ceiling, dense_bytes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BellState {
    /// (|00> + |11>) / sqrt 2
    PhiPlus,
    /// (|00> - |11>) / sqrt 2
    PhiMinus,
    /// (|01> + |10>) / sqrt 2
    PsiPlus,
    /// (|01> - |10>) / sqrt 2
    PsiMinus,
}

pub fn bell(which: BellState) -> StateVector {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let z = C64::new(0.0, 0.0);
    let (p, m) = (C64::new(s, 0.0), C64::new(-s, 0.0));
    let amps = match which {
        BellState::PhiPlus => vec![p, z, z, p],
        BellState::PhiMinus => vec![p, z, z, m],
        BellState::PsiPlus => vec![z, p, p, z],
        BellState::PsiMinus => vec![z, p, m, z],
    };
    StateVector::from_raw(amps)
}

/// (|0...0> + |1...1>) / sqrt 2
pub fn ghz(num_qubits: usize, ceiling: u64) -> QuantumResult<StateVector> {
    let mut amps = register(num_qubits, ceiling)?;
    let s = C64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
    let last = amps.len() - 1;
    amps[0] = s;
    amps[last] = s;
    StateVector::from_amplitudes(amps)
}

/// Equal superposition of all single-excitation basis states.
pub fn w(num_qubits: usize, ceiling: u64) -> QuantumResult<StateVector> {
    let mut amps = register(num_qubits, ceiling)?;
    let a = C64::new(1.0 / (num_qubits as f64).sqrt(), 0.0);
    for q in 0..num_qubits {
        amps[1 << q] = a;
    }
    StateVector::from_amplitudes(amps)
}

fn register(num_qubits: usize, ceiling: u64) -> QuantumResult<Vec<C64>> {
    if num_qubits < 2 {
        return Err(QuantumError::Validation(format!(
            "entangled states need at least two qubits, got {}",
            num_qubits
        )));
    }
    check_ceiling("state vector", num_qubits, dense_bytes(num_qubits), ceiling)?;
    Ok(vec![C64::new(0.0, 0.0); 1 << num_qubits])
}
