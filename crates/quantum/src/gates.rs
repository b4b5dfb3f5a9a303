use num_complex::Complex64;

use crate::error::{QuantumError, QuantumResult};

pub type C64 = Complex64;

/// Maximum entry-wise deviation of `U^dagger U` from identity.
pub const UNITARY_TOLERANCE: f64 = 1e-9;

/// A validated unitary acting on `num_qubits` qubits. Row/column index bit
/// `num_qubits - 1 - j` belongs to the `j`-th target, so the first target is
/// the most significant bit.
#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    name: String,
    num_qubits: usize,
    matrix: Vec<C64>,
}

impl Gate {
    /// Build a gate from a row-major square matrix. Unitarity is checked
    /// here once and never again on application.
    pub fn new(name: impl Into<String>, matrix: Vec<C64>) -> QuantumResult<Self> {
        let name = name.into();
        let dim = square_dim(&matrix).ok_or_else(|| {
            QuantumError::Validation(format!(
                "gate '{}' matrix has {} entries, not a 2^k x 2^k square",
                name,
                matrix.len()
            ))
        })?;
        let deviation = unitarity_deviation(&matrix, dim);
        if deviation > UNITARY_TOLERANCE {
            return Err(QuantumError::Validation(format!(
                "gate '{}' is not unitary (max deviation {:.3e})",
                name, deviation
            )));
        }
        Ok(Self::known(&name, matrix))
    }

    pub fn single(name: impl Into<String>, m: [[C64; 2]; 2]) -> QuantumResult<Self> {
        Self::new(name, m.iter().flatten().copied().collect())
    }

    pub fn two(name: impl Into<String>, m: [[C64; 4]; 4]) -> QuantumResult<Self> {
        Self::new(name, m.iter().flatten().copied().collect())
    }

    fn known(name: &str, matrix: Vec<C64>) -> Self {
        let dim = (matrix.len() as f64).sqrt().round() as usize;
        Self {
            name: name.to_string(),
            num_qubits: dim.trailing_zeros() as usize,
            matrix,
        }
    }

    fn known_1q(name: &str, m: [[C64; 2]; 2]) -> Self {
        Self::known(name, m.iter().flatten().copied().collect())
    }

    fn known_2q(name: &str, m: [[C64; 4]; 4]) -> Self {
        Self::known(name, m.iter().flatten().copied().collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn dim(&self) -> usize {
        1 << self.num_qubits
    }

    /// Row-major matrix entries.
    pub fn matrix(&self) -> &[C64] {
        &self.matrix
    }

    /// True when the matrix is the Toffoli gate, whatever the name.
    pub fn is_toffoli(&self) -> bool {
        self.num_qubits == 3
            && self
                .matrix
                .iter()
                .zip(Gate::toffoli().matrix())
                .all(|(a, b)| (a - b).norm() < 1e-12)
    }

    pub fn as_1q(&self) -> Option<[[C64; 2]; 2]> {
        if self.num_qubits != 1 {
            return None;
        }
        let m = &self.matrix;
        Some([[m[0], m[1]], [m[2], m[3]]])
    }

    pub fn as_2q(&self) -> Option<[[C64; 4]; 4]> {
        if self.num_qubits != 2 {
            return None;
        }
        let mut out = [[C64::new(0.0, 0.0); 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            row.copy_from_slice(&self.matrix[i * 4..i * 4 + 4]);
        }
        Some(out)
    }

    /// Targets must match the gate width, be distinct and lie in range.
    pub fn check_targets(&self, targets: &[usize], num_qubits: usize) -> QuantumResult<()> {
        if targets.len() != self.num_qubits {
            return Err(QuantumError::Validation(format!(
                "gate '{}' acts on {} qubits but {} targets were given",
                self.name,
                self.num_qubits,
                targets.len()
            )));
        }
        check_qubits(targets, num_qubits)
    }

    pub fn h() -> Self {
        Self::known_1q("h", hadamard())
    }

    pub fn x() -> Self {
        Self::known_1q("x", pauli_x())
    }

    pub fn y() -> Self {
        Self::known_1q("y", pauli_y())
    }

    pub fn z() -> Self {
        Self::known_1q("z", pauli_z())
    }

    pub fn s() -> Self {
        Self::known_1q("s", phase(std::f64::consts::FRAC_PI_2))
    }

    pub fn t() -> Self {
        Self::known_1q("t", phase(std::f64::consts::FRAC_PI_4))
    }

    pub fn rx(theta: f64) -> Self {
        Self::known_1q("rx", rx(theta))
    }

    pub fn ry(theta: f64) -> Self {
        Self::known_1q("ry", ry(theta))
    }

    pub fn rz(theta: f64) -> Self {
        Self::known_1q("rz", rz(theta))
    }

    pub fn phase(theta: f64) -> Self {
        Self::known_1q("p", phase(theta))
    }

    pub fn cnot() -> Self {
        Self::known_2q("cx", cnot())
    }

    pub fn cz() -> Self {
        Self::known_2q("cz", cz())
    }

    pub fn swap() -> Self {
        Self::known_2q("swap", tn::mps::swap_gate())
    }

    pub fn cphase(theta: f64) -> Self {
        let mut m = identity(4);
        m[15] = C64::from_polar(1.0, theta);
        Self::known("cp", m)
    }

    pub fn toffoli() -> Self {
        let mut m = identity(8);
        m[6 * 8 + 6] = C64::new(0.0, 0.0);
        m[7 * 8 + 7] = C64::new(0.0, 0.0);
        m[6 * 8 + 7] = C64::new(1.0, 0.0);
        m[7 * 8 + 6] = C64::new(1.0, 0.0);
        Self::known("ccx", m)
    }
}

/// Qubit indices must be distinct and below `num_qubits`.
pub fn check_qubits(qubits: &[usize], num_qubits: usize) -> QuantumResult<()> {
    for (i, &q) in qubits.iter().enumerate() {
        if q >= num_qubits {
            return Err(QuantumError::Validation(format!(
                "qubit {} out of range for {} qubits",
                q, num_qubits
            )));
        }
        if qubits[..i].contains(&q) {
            return Err(QuantumError::Validation(format!("qubit {} targeted twice", q)));
        }
    }
    Ok(())
}

fn square_dim(matrix: &[C64]) -> Option<usize> {
    let dim = (matrix.len() as f64).sqrt().round() as usize;
    (dim >= 2 && dim * dim == matrix.len() && dim.is_power_of_two()).then_some(dim)
}

/// `max |(M^dagger M - I)_{ij}|`
pub(crate) fn unitarity_deviation(m: &[C64], dim: usize) -> f64 {
    let mut worst: f64 = 0.0;
    for i in 0..dim {
        for j in 0..dim {
            let mut acc = C64::new(0.0, 0.0);
            for k in 0..dim {
                acc += m[k * dim + i].conj() * m[k * dim + j];
            }
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((acc - C64::new(target, 0.0)).norm());
        }
    }
    worst
}

pub(crate) fn identity(dim: usize) -> Vec<C64> {
    let mut m = vec![C64::new(0.0, 0.0); dim * dim];
    for i in 0..dim {
        m[i * dim + i] = C64::new(1.0, 0.0);
    }
    m
}

pub fn hadamard() -> [[C64; 2]; 2] {
    let s = 1.0 / 2.0_f64.sqrt();
    [
        [C64::new(s, 0.0), C64::new(s, 0.0)],
        [C64::new(s, 0.0), C64::new(-s, 0.0)],
    ]
}

pub fn pauli_x() -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    [[z, o], [o, z]]
}

pub fn pauli_y() -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    let i = C64::new(0.0, 1.0);
    let ni = C64::new(0.0, -1.0);
    [[z, ni], [i, z]]
}

pub fn pauli_z() -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    let m = C64::new(-1.0, 0.0);
    [[o, z], [z, m]]
}

pub fn rx(theta: f64) -> [[C64; 2]; 2] {
    let c = (theta / 2.0).cos();
    let s = (theta / 2.0).sin();
    [
        [C64::new(c, 0.0), C64::new(0.0, -s)],
        [C64::new(0.0, -s), C64::new(c, 0.0)],
    ]
}

pub fn ry(theta: f64) -> [[C64; 2]; 2] {
    let c = (theta / 2.0).cos();
    let s = (theta / 2.0).sin();
    [
        [C64::new(c, 0.0), C64::new(-s, 0.0)],
        [C64::new(s, 0.0), C64::new(c, 0.0)],
    ]
}

pub fn rz(theta: f64) -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    [
        [C64::from_polar(1.0, -theta / 2.0), z],
        [z, C64::from_polar(1.0, theta / 2.0)],
    ]
}

pub fn phase(theta: f64) -> [[C64; 2]; 2] {
    let z = C64::new(0.0, 0.0);
    [[C64::new(1.0, 0.0), z], [z, C64::from_polar(1.0, theta)]]
}

/// |00>→|00>, |01>→|01>, |10>→|11>, |11>→|10>
pub fn cnot() -> [[C64; 4]; 4] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    [
        [o, z, z, z],
        [z, o, z, z],
        [z, z, z, o],
        [z, z, o, z],
    ]
}

/// diag(1, 1, 1, -1)
pub fn cz() -> [[C64; 4]; 4] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    let m = C64::new(-1.0, 0.0);
    [
        [o, z, z, z],
        [z, o, z, z],
        [z, z, o, z],
        [z, z, z, m],
    ]
}
