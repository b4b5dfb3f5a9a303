use crate::error::{QuantumError, QuantumResult};
use crate::gates::{check_qubits, Gate, C64};
use crate::noise::KrausChannel;
use crate::statevector::{apply_matrix, StateVector};
use crate::{check_ceiling, density_bytes};

/// Row-major `2^n x 2^n` density matrix.
///
/// The flat buffer is treated as a `2n`-qubit register: row qubits occupy
/// positions `0..n` and column qubits `n..2n`, so `U rho U^dagger` is `U`
/// on the row qubits followed by `conj(U)` on the column qubits.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityMatrix {
    num_qubits: usize,
    data: Vec<C64>,
}

impl DensityMatrix {
    /// `|psi><psi|`, refused above the memory ceiling.
    pub fn from_pure(psi: &StateVector, ceiling: u64) -> QuantumResult<Self> {
        let n = psi.num_qubits();
        check_ceiling("density matrix", n, density_bytes(n), ceiling)?;
        let amps = psi.amplitudes();
        let dim = amps.len();
        let mut data = vec![C64::new(0.0, 0.0); dim * dim];
        for (i, a) in amps.iter().enumerate() {
            if *a == C64::new(0.0, 0.0) {
                continue;
            }
            for (j, b) in amps.iter().enumerate() {
                data[i * dim + j] = a * b.conj();
            }
        }
        Ok(Self { num_qubits: n, data })
    }

    pub fn from_matrix(num_qubits: usize, data: Vec<C64>) -> QuantumResult<Self> {
        let dim = 1usize << num_qubits;
        if data.len() != dim * dim {
            return Err(QuantumError::Validation(format!(
                "{} entries do not form a {}x{} matrix",
                data.len(),
                dim,
                dim
            )));
        }
        Ok(Self { num_qubits, data })
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn dim(&self) -> usize {
        1 << self.num_qubits
    }

    pub fn data(&self) -> &[C64] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> C64 {
        self.data[row * self.dim() + col]
    }

    pub fn apply_gate(&mut self, gate: &Gate, targets: &[usize]) -> QuantumResult<()> {
        gate.check_targets(targets, self.num_qubits)?;
        conjugate_by(&mut self.data, self.num_qubits, targets, gate.matrix());
        Ok(())
    }

    /// `rho -> sum_i K_i rho K_i^dagger`
    pub fn apply_channel(&mut self, channel: &KrausChannel, targets: &[usize]) -> QuantumResult<()> {
        channel.check_targets(targets, self.num_qubits)?;
        let mut out = vec![C64::new(0.0, 0.0); self.data.len()];
        for k in channel.operators() {
            let mut term = self.data.clone();
            conjugate_by(&mut term, self.num_qubits, targets, k);
            for (o, t) in out.iter_mut().zip(&term) {
                *o += t;
            }
        }
        self.data = out;
        Ok(())
    }

    pub fn trace(&self) -> C64 {
        let dim = self.dim();
        (0..dim).map(|i| self.data[i * dim + i]).sum()
    }

    /// `Tr(rho^2)`; equals `sum |rho_ij|^2` for Hermitian `rho`.
    pub fn purity(&self) -> f64 {
        self.data.iter().map(|z| z.norm_sqr()).sum()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        let dim = self.dim();
        (0..dim).map(|i| self.data[i * dim + i].re.max(0.0)).collect()
    }

    /// `<psi| rho |psi>`
    pub fn fidelity_with_pure(&self, psi: &StateVector) -> QuantumResult<f64> {
        if psi.num_qubits() != self.num_qubits {
            return Err(QuantumError::Validation(format!(
                "cannot compare {} and {} qubit states",
                psi.num_qubits(),
                self.num_qubits
            )));
        }
        let amps = psi.amplitudes();
        let dim = self.dim();
        let mut acc = C64::new(0.0, 0.0);
        for i in 0..dim {
            let mut row = C64::new(0.0, 0.0);
            for j in 0..dim {
                row += self.data[i * dim + j] * amps[j];
            }
            acc += amps[i].conj() * row;
        }
        Ok(acc.re)
    }

    /// Reduced state on `keep`, traced over every other qubit. The result
    /// orders its qubits as listed in `keep`.
    pub fn partial_trace(&self, keep: &[usize]) -> QuantumResult<DensityMatrix> {
        check_qubits(keep, self.num_qubits)?;
        let n = self.num_qubits;
        let dim = self.dim();
        let sub_dim = 1usize << keep.len();
        let keep_mask = keep.iter().fold(0usize, |m, &q| m | 1 << (n - 1 - q));
        let mut out = vec![C64::new(0.0, 0.0); sub_dim * sub_dim];
        for i in 0..dim {
            let ri = sub_index(i, keep, n);
            for j in 0..dim {
                if i & !keep_mask != j & !keep_mask {
                    continue;
                }
                out[ri * sub_dim + sub_index(j, keep, n)] += self.data[i * dim + j];
            }
        }
        DensityMatrix::from_matrix(keep.len(), out)
    }

    /// Reduced state of a pure vector on `keep`, without building the full
    /// `4^n` matrix.
    pub fn reduced_from_pure(psi: &StateVector, keep: &[usize]) -> QuantumResult<DensityMatrix> {
        let n = psi.num_qubits();
        check_qubits(keep, n)?;
        let amps = psi.amplitudes();
        let sub_dim = 1usize << keep.len();
        let keep_mask = keep.iter().fold(0usize, |m, &q| m | 1 << (n - 1 - q));
        let mut out = vec![C64::new(0.0, 0.0); sub_dim * sub_dim];
        // group amplitudes by their traced-out bits
        let mut groups: std::collections::BTreeMap<usize, Vec<(usize, C64)>> = Default::default();
        for (i, a) in amps.iter().enumerate() {
            if *a != C64::new(0.0, 0.0) {
                groups
                    .entry(i & !keep_mask)
                    .or_default()
                    .push((sub_index(i, keep, n), *a));
            }
        }
        for members in groups.values() {
            for (ri, a) in members {
                for (rj, b) in members {
                    out[ri * sub_dim + rj] += a * b.conj();
                }
            }
        }
        DensityMatrix::from_matrix(keep.len(), out)
    }
}

fn sub_index(i: usize, keep: &[usize], n: usize) -> usize {
    keep.iter()
        .fold(0usize, |acc, &q| (acc << 1) | ((i >> (n - 1 - q)) & 1))
}

fn conjugate_by(data: &mut [C64], n: usize, targets: &[usize], m: &[C64]) {
    apply_matrix(data, 2 * n, targets, m);
    let conj: Vec<C64> = m.iter().map(|z| z.conj()).collect();
    let cols: Vec<usize> = targets.iter().map(|t| t + n).collect();
    apply_matrix(data, 2 * n, &cols, &conj);
}
