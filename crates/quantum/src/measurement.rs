use backend::ComputeBackend;
use rng::ONDRng;
use tracing::debug;

use crate::density::DensityMatrix;
use crate::error::QuantumResult;
use crate::gates::{check_qubits, C64};
use crate::noise::sample_index;
use crate::state::QuantumState;

fn projector(outcome: usize) -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    if outcome == 0 {
        [[o, z], [z, z]]
    } else {
        [[z, z], [z, o]]
    }
}

/// Projective Z measurement of `qubit`; the state collapses onto the
/// sampled outcome.
pub fn measure_qubit(
    state: &mut QuantumState,
    backend: &dyn ComputeBackend,
    qubit: usize,
    rng: &mut ONDRng,
) -> QuantumResult<u8> {
    let n = state.num_qubits();
    check_qubits(&[qubit], n)?;
    let bit = 1usize << (n - 1 - qubit);

    let outcome = match state {
        QuantumState::Pure(psi) => {
            let mut probs = [0.0f64; 2];
            for (i, a) in psi.amplitudes().iter().enumerate() {
                probs[usize::from(i & bit != 0)] += a.norm_sqr();
            }
            let outcome = sample_index(&probs, rng, b"MEASURE_Z");
            let scale = 1.0 / probs[outcome].sqrt().max(f64::MIN_POSITIVE);
            for (i, a) in psi.amplitudes_mut().iter_mut().enumerate() {
                if usize::from(i & bit != 0) == outcome {
                    *a *= scale;
                } else {
                    *a = C64::new(0.0, 0.0);
                }
            }
            outcome
        }
        QuantumState::Mixed(rho) => {
            let probs = marginal(rho, bit);
            let outcome = sample_index(&probs, rng, b"MEASURE_Z");
            let dim = rho.dim();
            let scale = 1.0 / probs[outcome].max(f64::MIN_POSITIVE);
            let mut data = rho.data().to_vec();
            for (idx, z) in data.iter_mut().enumerate() {
                let (r, c) = (idx / dim, idx % dim);
                let keep = usize::from(r & bit != 0) == outcome && usize::from(c & bit != 0) == outcome;
                *z = if keep { *z * scale } else { C64::new(0.0, 0.0) };
            }
            *rho = DensityMatrix::from_matrix(n, data)?;
            outcome
        }
        QuantumState::Mps(mps) => {
            let ops = [projector(0), projector(1)];
            let probs = mps.operator_weights(backend, qubit, &ops)?;
            let outcome = sample_index(&probs, rng, b"MEASURE_Z");
            mps.apply_1q_normalized(qubit, &ops[outcome], probs[outcome])?;
            outcome
        }
    };
    debug!(qubit, outcome, "measured");
    Ok(outcome as u8)
}

fn marginal(rho: &DensityMatrix, bit: usize) -> [f64; 2] {
    let mut probs = [0.0f64; 2];
    for (i, p) in rho.probabilities().into_iter().enumerate() {
        probs[usize::from(i & bit != 0)] += p;
    }
    probs
}

/// `<Z>` on `qubit`.
pub fn expectation_z(state: &QuantumState, qubit: usize) -> QuantumResult<f64> {
    let n = state.num_qubits();
    check_qubits(&[qubit], n)?;
    let bit = 1usize << (n - 1 - qubit);
    Ok(match state {
        QuantumState::Pure(psi) => psi
            .amplitudes()
            .iter()
            .enumerate()
            .map(|(i, a)| if i & bit == 0 { a.norm_sqr() } else { -a.norm_sqr() })
            .sum(),
        QuantumState::Mixed(rho) => {
            let p = marginal(rho, bit);
            p[0] - p[1]
        }
        QuantumState::Mps(mps) => {
            let rho = mps.site_density(qubit)?;
            (rho[0][0] - rho[1][1]).re
        }
    })
}
