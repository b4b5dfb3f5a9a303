use quantum::{Gate, KrausChannel, QuantumError, QuantumResult};

#[derive(Clone, Debug)]
pub enum Operation {
    Gate { gate: Gate, targets: Vec<usize> },
    Noise { channel: KrausChannel, targets: Vec<usize> },
}

impl Operation {
    pub fn targets(&self) -> &[usize] {
        match self {
            Self::Gate { targets, .. } | Self::Noise { targets, .. } => targets,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Gate { gate, .. } => gate.name(),
            Self::Noise { channel, .. } => channel.name(),
        }
    }
}

/// Ordered operation list over a fixed register. Targets are checked on
/// insertion so a built circuit never fails validation at run time.
#[derive(Clone, Debug)]
pub struct Circuit {
    num_qubits: usize,
    ops: Vec<Operation>,
}

impl Circuit {
    pub fn new(num_qubits: usize) -> Self {
        Self {
            num_qubits,
            ops: Vec::new(),
        }
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn has_noise(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Operation::Noise { .. }))
    }

    pub fn add_gate(&mut self, gate: Gate, targets: &[usize]) -> QuantumResult<&mut Self> {
        gate.check_targets(targets, self.num_qubits)?;
        self.ops.push(Operation::Gate {
            gate,
            targets: targets.to_vec(),
        });
        Ok(self)
    }

    pub fn add_noise(&mut self, channel: KrausChannel, targets: &[usize]) -> QuantumResult<&mut Self> {
        channel.check_targets(targets, self.num_qubits)?;
        self.ops.push(Operation::Noise {
            channel,
            targets: targets.to_vec(),
        });
        Ok(self)
    }

    /// The same single-qubit channel on every qubit.
    pub fn add_noise_layer(&mut self, channel: &KrausChannel) -> QuantumResult<&mut Self> {
        for q in 0..self.num_qubits {
            self.add_noise(channel.clone(), &[q])?;
        }
        Ok(self)
    }

    pub fn h(&mut self, q: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::h(), &[q])
    }

    pub fn x(&mut self, q: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::x(), &[q])
    }

    pub fn rx(&mut self, theta: f64, q: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::rx(theta), &[q])
    }

    pub fn ry(&mut self, theta: f64, q: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::ry(theta), &[q])
    }

    pub fn rz(&mut self, theta: f64, q: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::rz(theta), &[q])
    }

    pub fn cnot(&mut self, control: usize, target: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::cnot(), &[control, target])
    }

    pub fn cz(&mut self, a: usize, b: usize) -> QuantumResult<&mut Self> {
        self.add_gate(Gate::cz(), &[a, b])
    }

    /// Split into the first `k` operations and the rest.
    pub fn split_at(&self, k: usize) -> (Circuit, Circuit) {
        let k = k.min(self.ops.len());
        (
            Circuit {
                num_qubits: self.num_qubits,
                ops: self.ops[..k].to_vec(),
            },
            Circuit {
                num_qubits: self.num_qubits,
                ops: self.ops[k..].to_vec(),
            },
        )
    }

    /// `H(0)` followed by a CNOT chain.
    pub fn ghz(num_qubits: usize) -> QuantumResult<Self> {
        if num_qubits == 0 {
            return Err(QuantumError::Validation("GHZ needs at least one qubit".into()));
        }
        let mut c = Self::new(num_qubits);
        c.h(0)?;
        for q in 0..num_qubits - 1 {
            c.cnot(q, q + 1)?;
        }
        Ok(c)
    }

    pub fn bell() -> QuantumResult<Self> {
        Self::ghz(2)
    }

    /// Layers of fixed-angle rotations followed by alternating
    /// nearest-neighbour CNOTs, closed by one long-range CZ per layer.
    pub fn brickwork(num_qubits: usize, depth: usize) -> QuantumResult<Self> {
        let mut c = Self::new(num_qubits);
        for layer in 0..depth {
            for q in 0..num_qubits {
                let angle = 0.37 + 0.21 * q as f64 + 0.13 * layer as f64;
                c.ry(angle, q)?;
                c.rz(0.5 * angle, q)?;
            }
            for q in (layer % 2..num_qubits.saturating_sub(1)).step_by(2) {
                c.cnot(q, q + 1)?;
            }
            if num_qubits > 2 {
                c.cz(num_qubits - 1, 0)?;
            }
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_targets_on_insert() {
        let mut c = Circuit::new(2);
        assert!(c.cnot(0, 2).is_err());
        assert!(c.cnot(1, 1).is_err());
        assert!(c.is_empty());
    }

    #[test]
    fn split_keeps_order() {
        let c = Circuit::brickwork(4, 3).unwrap();
        let (a, b) = c.split_at(10);
        assert_eq!(a.len(), 10);
        assert_eq!(a.len() + b.len(), c.len());
        assert_eq!(b.operations()[0].name(), c.operations()[10].name());
    }

    #[test]
    fn ghz_shape() {
        let c = Circuit::ghz(5).unwrap();
        assert_eq!(c.len(), 5);
        assert!(!c.has_noise());
    }
}
