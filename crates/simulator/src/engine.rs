use std::sync::Arc;

use backend::ComputeBackend;
use quantum::{QuantumError, QuantumResult, QuantumState, RepresentationChange};
use rng::ONDRng;
use tracing::{debug, info, warn};

use crate::circuit::{Circuit, Operation};
use crate::config::SimConfig;

/// Outcome of a full circuit run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub state: QuantumState,
    /// Representation switches caused by noise, in order.
    pub changes: Vec<RepresentationChange>,
    /// Bond dimension the run finished with; `None` for dense runs.
    pub bond_dim: Option<usize>,
}

/// Single-process engine: picks the representation and drives a circuit
/// through it.
#[derive(Clone, Debug)]
pub struct Simulator {
    config: SimConfig,
    backend: Arc<dyn ComputeBackend>,
    seed: u64,
}

impl Simulator {
    pub fn new(config: SimConfig, backend: Arc<dyn ComputeBackend>, seed: u64) -> QuantumResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            seed,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `|0...0>`: dense up to `exact_threshold` qubits, MPS above.
    pub fn initialize(&self, num_qubits: usize) -> QuantumResult<QuantumState> {
        if num_qubits == 0 {
            return Err(QuantumError::Validation("register needs at least one qubit".into()));
        }
        let state = if num_qubits <= self.config.exact_threshold {
            QuantumState::zero_dense(num_qubits, self.config.memory_ceiling_bytes)?
        } else {
            QuantumState::zero_mps(num_qubits, self.config.truncation(), self.config.budget)?
        };
        debug!(num_qubits, kind = ?state.kind(), "initialised state");
        Ok(state)
    }

    /// Apply one operation exactly. Noise promotes pure states to a
    /// density matrix.
    pub fn apply(&self, state: &mut QuantumState, op: &Operation) -> QuantumResult<Option<RepresentationChange>> {
        match op {
            Operation::Gate { gate, targets } => {
                state.apply_gate(self.backend(), gate, targets)?;
                Ok(None)
            }
            Operation::Noise { channel, targets } => {
                state.apply_noise(channel, targets, self.config.memory_ceiling_bytes)
            }
        }
    }

    pub fn run(&self, circuit: &Circuit) -> QuantumResult<RunReport> {
        let state = self.initialize(circuit.num_qubits())?;
        self.run_from(state, circuit)
    }

    pub fn run_from(&self, mut state: QuantumState, circuit: &Circuit) -> QuantumResult<RunReport> {
        check_width(&state, circuit)?;
        let mut changes = Vec::new();
        for op in circuit.operations() {
            if let Some(change) = self.apply(&mut state, op)? {
                changes.push(change);
            }
        }
        Ok(RunReport {
            bond_dim: matches!(state, QuantumState::Mps(_)).then_some(self.config.bond_dim),
            state,
            changes,
        })
    }

    /// One stochastic trajectory: noise is unravelled by sampling Kraus
    /// branches from `rng`, so the state stays pure.
    pub fn run_trajectory(
        &self,
        mut state: QuantumState,
        circuit: &Circuit,
        rng: &mut ONDRng,
    ) -> QuantumResult<QuantumState> {
        check_width(&state, circuit)?;
        for op in circuit.operations() {
            match op {
                Operation::Gate { gate, targets } => {
                    state.apply_gate(self.backend(), gate, targets)?;
                }
                Operation::Noise { channel, targets } => {
                    state.apply_noise_sampled(self.backend(), channel, targets, rng)?;
                }
            }
        }
        Ok(state)
    }

    /// Run, doubling `bond_dim` after every budget overrun until
    /// `max_bond_dim`. Each retry restarts from `|0...0>`.
    pub fn run_adaptive(&self, circuit: &Circuit) -> QuantumResult<RunReport> {
        let mut attempt = self.clone();
        loop {
            match attempt.run(circuit) {
                Err(err) if err.is_recoverable() && attempt.config.bond_dim < attempt.config.max_bond_dim => {
                    let next = (attempt.config.bond_dim * 2).min(attempt.config.max_bond_dim);
                    warn!(
                        error = %err,
                        from = attempt.config.bond_dim,
                        to = next,
                        "truncation budget exceeded, retrying with larger bond"
                    );
                    attempt.config.bond_dim = next;
                }
                Ok(report) => {
                    if attempt.config.bond_dim != self.config.bond_dim {
                        info!(bond_dim = attempt.config.bond_dim, "adaptive run settled");
                    }
                    return Ok(report);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn check_width(state: &QuantumState, circuit: &Circuit) -> QuantumResult<()> {
    if state.num_qubits() != circuit.num_qubits() {
        return Err(QuantumError::Validation(format!(
            "circuit on {} qubits cannot run on a {} qubit state",
            circuit.num_qubits(),
            state.num_qubits()
        )));
    }
    Ok(())
}
