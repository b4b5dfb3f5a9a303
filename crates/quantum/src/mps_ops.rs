use backend::ComputeBackend;
use rng::ONDRng;
use std::f64::consts::FRAC_PI_4;
use tn::Mps;
use tracing::debug;

use crate::error::{QuantumError, QuantumResult};
use crate::gates::Gate;
use crate::noise::{sample_index, KrausChannel};

/// Apply `gate` to an MPS and return the relative weight discarded by
/// truncation. The update is all-or-nothing: if the truncation budget
/// rejects any step the chain is left as it was.
pub fn apply_gate_mps(
    mps: &mut Mps,
    backend: &dyn ComputeBackend,
    gate: &Gate,
    targets: &[usize],
) -> QuantumResult<f64> {
    gate.check_targets(targets, mps.len())?;
    if let Some(u) = gate.as_1q() {
        mps.apply_1q(targets[0], &u)?;
        return Ok(0.0);
    }

    let mut work = mps.clone();
    let discarded = match gate.as_2q() {
        Some(u) => work.apply_2q(backend, targets[0], targets[1], &u)?,
        None if gate.is_toffoli() => toffoli(&mut work, backend, targets)?,
        None => {
            return Err(QuantumError::Validation(format!(
                "gate '{}' on {} qubits has no MPS decomposition",
                gate.name(),
                gate.num_qubits()
            )))
        }
    };
    *mps = work;
    debug!(gate = gate.name(), ?targets, discarded, "mps gate");
    Ok(discarded)
}

/// Exact Clifford+T decomposition of the Toffoli gate.
fn toffoli(mps: &mut Mps, backend: &dyn ComputeBackend, targets: &[usize]) -> QuantumResult<f64> {
    let (a, b, c) = (targets[0], targets[1], targets[2]);
    let h = Gate::h();
    let t = Gate::t();
    let tdg = Gate::phase(-FRAC_PI_4);
    let cx = Gate::cnot();
    let steps: [(&Gate, Vec<usize>); 15] = [
        (&h, vec![c]),
        (&cx, vec![b, c]),
        (&tdg, vec![c]),
        (&cx, vec![a, c]),
        (&t, vec![c]),
        (&cx, vec![b, c]),
        (&tdg, vec![c]),
        (&cx, vec![a, c]),
        (&t, vec![b]),
        (&t, vec![c]),
        (&h, vec![c]),
        (&cx, vec![a, b]),
        (&t, vec![a]),
        (&tdg, vec![b]),
        (&cx, vec![a, b]),
    ];
    let mut discarded = 0.0;
    for (g, q) in steps {
        if let Some(u) = g.as_1q() {
            mps.apply_1q(q[0], &u)?;
        } else if let Some(u) = g.as_2q() {
            discarded += mps.apply_2q(backend, q[0], q[1], &u)?;
        }
    }
    Ok(discarded)
}

/// Stochastic unravelling of a single-qubit channel on an MPS.
pub fn apply_noise_trajectory_mps(
    mps: &mut Mps,
    backend: &dyn ComputeBackend,
    channel: &KrausChannel,
    targets: &[usize],
    rng: &mut ONDRng,
) -> QuantumResult<usize> {
    channel.check_targets(targets, mps.len())?;
    let ops = channel.as_1q_ops().ok_or_else(|| {
        QuantumError::Validation(format!(
            "channel '{}' acts on {} qubits; MPS trajectories support one",
            channel.name(),
            channel.num_qubits()
        ))
    })?;
    let k = targets[0];
    let weights = mps.operator_weights(backend, k, &ops)?;
    let chosen = sample_index(&weights, rng, b"KRAUS_MPS");
    mps.apply_1q_normalized(k, &ops[chosen], weights[chosen])?;
    debug!(channel = channel.name(), site = k, chosen, "mps kraus branch");
    Ok(chosen)
}
