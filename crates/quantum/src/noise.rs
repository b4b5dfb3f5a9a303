use rng::ONDRng;

use crate::error::{QuantumError, QuantumResult};
use crate::gates::{identity, pauli_x, pauli_y, pauli_z, C64};

/// Maximum entry-wise deviation of `sum K^dagger K` from identity.
pub const COMPLETENESS_TOLERANCE: f64 = 1e-9;

/// A noise channel in operator-sum form. Operators are row-major
/// `2^k x 2^k` matrices over the channel's `k` target qubits.
#[derive(Clone, Debug, PartialEq)]
pub struct KrausChannel {
    name: String,
    num_qubits: usize,
    operators: Vec<Vec<C64>>,
}

impl KrausChannel {
    pub fn new(name: impl Into<String>, operators: Vec<Vec<C64>>) -> QuantumResult<Self> {
        let name = name.into();
        let first = operators.first().ok_or_else(|| {
            QuantumError::Validation(format!("channel '{}' has no Kraus operators", name))
        })?;
        let dim = (first.len() as f64).sqrt().round() as usize;
        if dim < 2 || !dim.is_power_of_two() || dim * dim != first.len() {
            return Err(QuantumError::Validation(format!(
                "channel '{}' operator has {} entries, not a 2^k x 2^k square",
                name,
                first.len()
            )));
        }
        if operators.iter().any(|k| k.len() != dim * dim) {
            return Err(QuantumError::Validation(format!(
                "channel '{}' mixes operator sizes",
                name
            )));
        }

        let mut worst: f64 = 0.0;
        for i in 0..dim {
            for j in 0..dim {
                let mut acc = C64::new(0.0, 0.0);
                for k in &operators {
                    for r in 0..dim {
                        acc += k[r * dim + i].conj() * k[r * dim + j];
                    }
                }
                let target = if i == j { 1.0 } else { 0.0 };
                worst = worst.max((acc - C64::new(target, 0.0)).norm());
            }
        }
        if worst > COMPLETENESS_TOLERANCE {
            return Err(QuantumError::Validation(format!(
                "channel '{}' is not trace preserving (max deviation {:.3e})",
                name, worst
            )));
        }

        Ok(Self {
            name,
            num_qubits: dim.trailing_zeros() as usize,
            operators,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn operators(&self) -> &[Vec<C64>] {
        &self.operators
    }

    /// Operators as 2x2 arrays, for single-qubit channels only.
    pub fn as_1q_ops(&self) -> Option<Vec<[[C64; 2]; 2]>> {
        if self.num_qubits != 1 {
            return None;
        }
        Some(
            self.operators
                .iter()
                .map(|k| [[k[0], k[1]], [k[2], k[3]]])
                .collect(),
        )
    }

    pub fn check_targets(&self, targets: &[usize], num_qubits: usize) -> QuantumResult<()> {
        if targets.len() != self.num_qubits {
            return Err(QuantumError::Validation(format!(
                "channel '{}' acts on {} qubits but {} targets were given",
                self.name,
                self.num_qubits,
                targets.len()
            )));
        }
        crate::gates::check_qubits(targets, num_qubits)
    }

    /// `|1> -> |0>` decay with probability `gamma`.
    pub fn amplitude_damping(gamma: f64) -> QuantumResult<Self> {
        check_probability("gamma", gamma)?;
        let z = C64::new(0.0, 0.0);
        let k0 = vec![C64::new(1.0, 0.0), z, z, C64::new((1.0 - gamma).sqrt(), 0.0)];
        let k1 = vec![z, C64::new(gamma.sqrt(), 0.0), z, z];
        Self::new("amplitude_damping", vec![k0, k1])
    }

    pub fn phase_damping(lambda: f64) -> QuantumResult<Self> {
        check_probability("lambda", lambda)?;
        let z = C64::new(0.0, 0.0);
        let k0 = vec![C64::new(1.0, 0.0), z, z, C64::new((1.0 - lambda).sqrt(), 0.0)];
        let k1 = vec![z, z, z, C64::new(lambda.sqrt(), 0.0)];
        Self::new("phase_damping", vec![k0, k1])
    }

    /// With probability `p` one of X, Y, Z is applied uniformly at random.
    pub fn depolarizing(p: f64) -> QuantumResult<Self> {
        check_probability("p", p)?;
        let keep = (1.0 - p).sqrt();
        let kick = (p / 3.0).sqrt();
        let mut ops = vec![scaled(&identity(2), keep)];
        for pauli in [pauli_x(), pauli_y(), pauli_z()] {
            ops.push(scaled(&flatten(pauli), kick));
        }
        Self::new("depolarizing", ops)
    }

    pub fn bit_flip(p: f64) -> QuantumResult<Self> {
        check_probability("p", p)?;
        Self::new(
            "bit_flip",
            vec![
                scaled(&identity(2), (1.0 - p).sqrt()),
                scaled(&flatten(pauli_x()), p.sqrt()),
            ],
        )
    }

    pub fn phase_flip(p: f64) -> QuantumResult<Self> {
        check_probability("p", p)?;
        Self::new(
            "phase_flip",
            vec![
                scaled(&identity(2), (1.0 - p).sqrt()),
                scaled(&flatten(pauli_z()), p.sqrt()),
            ],
        )
    }
}

fn check_probability(what: &str, p: f64) -> QuantumResult<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(QuantumError::Validation(format!(
            "{} must lie in [0, 1], got {}",
            what, p
        )));
    }
    Ok(())
}

fn flatten(m: [[C64; 2]; 2]) -> Vec<C64> {
    m.iter().flatten().copied().collect()
}

fn scaled(m: &[C64], s: f64) -> Vec<C64> {
    m.iter().map(|z| z * s).collect()
}

/// Pick an index with probability proportional to `weights`. Zero total
/// weight falls back to index 0.
pub(crate) fn sample_index(weights: &[f64], rng: &mut ONDRng, ctx: &[u8]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let mut x = rng.next_f64(ctx) * total;
    for (i, w) in weights.iter().enumerate() {
        if x < *w {
            return i;
        }
        x -= *w;
    }
    // rounding left x just above the last bucket
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_channels_are_complete() {
        for ch in [
            KrausChannel::amplitude_damping(0.3),
            KrausChannel::phase_damping(0.7),
            KrausChannel::depolarizing(0.1),
            KrausChannel::bit_flip(0.5),
            KrausChannel::phase_flip(1.0),
        ] {
            let ch = ch.unwrap();
            assert_eq!(ch.num_qubits(), 1);
        }
    }

    #[test]
    fn probabilities_outside_unit_interval_are_rejected() {
        assert!(KrausChannel::amplitude_damping(-0.1).is_err());
        assert!(KrausChannel::depolarizing(1.5).is_err());
    }

    #[test]
    fn incomplete_operator_set_is_rejected() {
        let z = C64::new(0.0, 0.0);
        let k0 = vec![C64::new(1.0, 0.0), z, z, C64::new(0.5, 0.0)];
        let err = KrausChannel::new("leaky", vec![k0]).unwrap_err();
        assert!(matches!(err, QuantumError::Validation(_)));
    }

    #[test]
    fn empty_channel_is_rejected() {
        assert!(KrausChannel::new("none", vec![]).is_err());
    }

    #[test]
    fn sampling_respects_zero_weights() {
        let mut rng = ONDRng::from_seed(5);
        for _ in 0..100 {
            assert_eq!(sample_index(&[0.0, 2.0, 0.0], &mut rng, b"TEST"), 1);
        }
    }
}
