use rng::ONDRng;
use tracing::debug;

use crate::error::{QuantumError, QuantumResult};
use crate::gates::{Gate, C64};
use crate::noise::{sample_index, KrausChannel};
use crate::{check_ceiling, dense_bytes};

/// Tolerance on `sum |a|^2 = 1` for externally supplied amplitudes.
pub const NORM_TOLERANCE: f64 = 1e-8;

/// Dense big-endian amplitude vector of length `2^num_qubits`.
#[derive(Clone, Debug, PartialEq)]
pub struct StateVector {
    num_qubits: usize,
    amps: Vec<C64>,
}

impl StateVector {
    /// `|0...0>`, refused if the vector would exceed `ceiling` bytes.
    pub fn new(num_qubits: usize, ceiling: u64) -> QuantumResult<Self> {
        check_ceiling("state vector", num_qubits, dense_bytes(num_qubits), ceiling)?;
        let mut amps = vec![C64::new(0.0, 0.0); 1 << num_qubits];
        amps[0] = C64::new(1.0, 0.0);
        Ok(Self { num_qubits, amps })
    }

    pub fn from_amplitudes(amps: Vec<C64>) -> QuantumResult<Self> {
        let state = Self::unnormalized(amps)?;
        let norm = state.norm_sqr();
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(QuantumError::Validation(format!(
                "amplitudes have squared norm {}",
                norm
            )));
        }
        Ok(state)
    }

    /// Wrap amplitudes without a norm check. Used for shards, which each
    /// hold only part of the global norm.
    pub fn unnormalized(amps: Vec<C64>) -> QuantumResult<Self> {
        if amps.is_empty() || !amps.len().is_power_of_two() {
            return Err(QuantumError::Validation(format!(
                "amplitude vector of length {} is not a qubit register",
                amps.len()
            )));
        }
        Ok(Self {
            num_qubits: amps.len().trailing_zeros() as usize,
            amps,
        })
    }

    /// Caller guarantees a power-of-two length.
    pub(crate) fn from_raw(amps: Vec<C64>) -> Self {
        Self {
            num_qubits: amps.len().trailing_zeros() as usize,
            amps,
        }
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn amplitudes(&self) -> &[C64] {
        &self.amps
    }

    pub fn amplitudes_mut(&mut self) -> &mut [C64] {
        &mut self.amps
    }

    pub fn into_amplitudes(self) -> Vec<C64> {
        self.amps
    }

    pub fn norm_sqr(&self) -> f64 {
        self.amps.iter().map(|a| a.norm_sqr()).sum()
    }

    pub fn apply_gate(&mut self, gate: &Gate, targets: &[usize]) -> QuantumResult<()> {
        gate.check_targets(targets, self.num_qubits)?;
        apply_matrix(&mut self.amps, self.num_qubits, targets, gate.matrix());
        Ok(())
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.amps.iter().map(|a| a.norm_sqr()).collect()
    }

    /// `<self|other>`
    pub fn inner(&self, other: &StateVector) -> QuantumResult<C64> {
        if self.amps.len() != other.amps.len() {
            return Err(QuantumError::Validation(format!(
                "cannot overlap {} and {} qubit states",
                self.num_qubits, other.num_qubits
            )));
        }
        Ok(self
            .amps
            .iter()
            .zip(&other.amps)
            .map(|(a, b)| a.conj() * b)
            .sum())
    }

    /// `|<self|other>|^2`
    pub fn fidelity(&self, other: &StateVector) -> QuantumResult<f64> {
        Ok(self.inner(other)?.norm_sqr())
    }

    pub fn renormalize(&mut self) {
        let norm = self.norm_sqr().sqrt();
        if norm > 0.0 {
            for a in self.amps.iter_mut() {
                *a /= norm;
            }
        }
    }

    /// Stochastic unravelling of `channel`: picks Kraus operator `i` with
    /// probability `||K_i psi||^2` and keeps the renormalised branch.
    pub fn apply_noise_trajectory(
        &mut self,
        channel: &KrausChannel,
        targets: &[usize],
        rng: &mut ONDRng,
    ) -> QuantumResult<usize> {
        channel.check_targets(targets, self.num_qubits)?;
        let mut branches: Vec<Vec<C64>> = channel
            .operators()
            .iter()
            .map(|k| {
                let mut branch = self.amps.clone();
                apply_matrix(&mut branch, self.num_qubits, targets, k);
                branch
            })
            .collect();
        let weights: Vec<f64> = branches
            .iter()
            .map(|b| b.iter().map(|a| a.norm_sqr()).sum())
            .collect();
        let chosen = sample_index(&weights, rng, b"KRAUS_DENSE");
        let scale = 1.0 / weights[chosen].sqrt().max(f64::MIN_POSITIVE);
        self.amps = branches.swap_remove(chosen);
        for a in self.amps.iter_mut() {
            *a *= scale;
        }
        debug!(channel = channel.name(), chosen, weight = weights[chosen], "kraus branch");
        Ok(chosen)
    }
}

/// Apply a row-major `2^k x 2^k` matrix to `targets` of a big-endian
/// register holding `num_qubits` qubits. Targets are assumed valid.
pub(crate) fn apply_matrix(amps: &mut [C64], num_qubits: usize, targets: &[usize], m: &[C64]) {
    let k = targets.len();
    let dim = 1usize << k;
    let offsets: Vec<usize> = (0..dim)
        .map(|j| {
            targets.iter().enumerate().fold(0usize, |acc, (t, &q)| {
                if (j >> (k - 1 - t)) & 1 == 1 {
                    acc | 1 << (num_qubits - 1 - q)
                } else {
                    acc
                }
            })
        })
        .collect();
    let mask = offsets[dim - 1];
    let mut buf = vec![C64::new(0.0, 0.0); dim];
    for base in 0..amps.len() {
        if base & mask != 0 {
            continue;
        }
        for (slot, off) in buf.iter_mut().zip(&offsets) {
            *slot = amps[base | off];
        }
        for (i, off) in offsets.iter().enumerate() {
            let row = &m[i * dim..(i + 1) * dim];
            let mut acc = C64::new(0.0, 0.0);
            for (g, b) in row.iter().zip(&buf) {
                acc += g * b;
            }
            amps[base | off] = acc;
        }
    }
}

/// Public entry for shard kernels: apply `gate` to local qubit indices of
/// an unnormalised register.
pub fn apply_gate_local(amps: &mut [C64], gate: &Gate, local_targets: &[usize]) -> QuantumResult<()> {
    if amps.is_empty() || !amps.len().is_power_of_two() {
        return Err(QuantumError::Validation(format!(
            "register of length {} is not a power of two",
            amps.len()
        )));
    }
    let n = amps.len().trailing_zeros() as usize;
    gate.check_targets(local_targets, n)?;
    apply_matrix(amps, n, local_targets, gate.matrix());
    Ok(())
}
