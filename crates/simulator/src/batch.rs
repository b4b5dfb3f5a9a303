use quantum::{QuantumResult, QuantumState};
use rayon::prelude::*;
use rng::{trajectory_seed, ONDRng};
use tracing::debug;

use crate::circuit::Circuit;
use crate::engine::Simulator;

#[derive(Clone, Debug)]
pub struct Trajectory {
    pub index: usize,
    pub seed: u64,
    pub probabilities: Vec<f64>,
    pub truncation_error: f64,
}

#[derive(Clone, Debug)]
pub struct BatchResult {
    /// Ordered by trajectory index.
    pub trajectories: Vec<Trajectory>,
}

impl BatchResult {
    /// Average basis probabilities, summed in index order so the result
    /// does not depend on how rayon grouped the work.
    pub fn mean_probabilities(&self) -> Vec<f64> {
        let Some(first) = self.trajectories.first() else {
            return Vec::new();
        };
        let mut total = vec![0.0; first.probabilities.len()];
        for t in &self.trajectories {
            for (acc, p) in total.iter_mut().zip(&t.probabilities) {
                *acc += p;
            }
        }
        let n = self.trajectories.len() as f64;
        total.iter_mut().for_each(|x| *x /= n);
        total
    }
}

/// Run `trajectories` independent samples of `circuit` from `initial`.
/// Trajectory `i` draws from `hash(seed, i)`, so results do not depend on
/// scheduling.
pub fn batch_run(
    sim: &Simulator,
    initial: &QuantumState,
    circuit: &Circuit,
    trajectories: usize,
) -> QuantumResult<BatchResult> {
    let ceiling = sim.config().memory_ceiling_bytes;
    let trajectories = (0..trajectories)
        .into_par_iter()
        .map(|index| -> QuantumResult<Trajectory> {
            let seed = trajectory_seed(sim.seed(), index);
            let mut rng = ONDRng::from_seed(seed);
            let state = sim.run_trajectory(initial.clone(), circuit, &mut rng)?;
            Ok(Trajectory {
                index,
                seed,
                probabilities: state.probabilities(ceiling)?,
                truncation_error: state.truncation_error(),
            })
        })
        .collect::<QuantumResult<Vec<_>>>()?;
    debug!(count = trajectories.len(), "batch finished");
    Ok(BatchResult { trajectories })
}
