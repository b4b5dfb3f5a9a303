use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backend::{select_backend, ComputeBackend};
use quantum::QuantumState;
use serde::{Deserialize, Serialize};
use simulator::{Circuit, Operation};
use tracing::{error, info, warn};

use crate::checkpoint::{checkpoint_restore, checkpoint_save, latest_consistent_generation, prune_generations};
use crate::config::JobConfig;
use crate::distributed::apply_distributed_gate;
use crate::error::{ClusterError, ClusterResult, ErrorKind};
use crate::mesh::{init_cluster_with_backend, Context};
use crate::sharded::{shard_state, unshard, ShardedState};

/// Job lifecycle:
/// `Uninitialized -> ClusterReady -> Running -> [Checkpointed <-> Running]* -> Completed | Aborted`.
/// Recovery takes `Aborted` back to `ClusterReady`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Uninitialized,
    ClusterReady,
    Running,
    Checkpointed,
    Completed,
    Aborted,
}

impl JobState {
    pub fn can_move_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Uninitialized, ClusterReady)
                | (ClusterReady, Running)
                | (ClusterReady, Aborted)
                | (Running, Checkpointed)
                | (Running, Completed)
                | (Running, Aborted)
                | (Checkpointed, Running)
                | (Checkpointed, Aborted)
                | (Aborted, ClusterReady)
        )
    }
}

/// Cooperative job-level cancellation. Checked between gates only.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    /// Collective rounds performed by gates.
    pub rounds: u64,
    /// Generations written during this run, oldest first.
    pub checkpoints: Vec<PathBuf>,
    pub truncation_error: f64,
}

pub struct Job {
    config: JobConfig,
    state: JobState,
    history: Vec<JobState>,
    ctx: Option<Context>,
    sharded: Option<ShardedState>,
    cancel: CancelHandle,
    last_error: Option<ErrorKind>,
}

impl Job {
    pub fn new(config: JobConfig) -> ClusterResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: JobState::Uninitialized,
            history: vec![JobState::Uninitialized],
            ctx: None,
            sharded: None,
            cancel: CancelHandle::default(),
            last_error: None,
        })
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has been in, in order.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn context(&self) -> Option<&Context> {
        self.ctx.as_ref()
    }

    pub fn sharded(&self) -> Option<&ShardedState> {
        self.sharded.as_ref()
    }

    /// Kind of the error that aborted the job, if any.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn transition(&mut self, next: JobState) -> ClusterResult<()> {
        if !self.state.can_move_to(next) {
            return Err(ClusterError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(from = ?self.state, to = ?next, "job state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Bring the cluster up on the configured backend.
    pub fn init(&mut self) -> ClusterResult<()> {
        let backend = select_backend(&self.config.backend_name)?;
        self.init_with_backend(backend)
    }

    pub fn init_with_backend(&mut self, backend: Arc<dyn ComputeBackend>) -> ClusterResult<()> {
        if self.state != JobState::Uninitialized {
            return Err(ClusterError::InvalidTransition {
                from: self.state,
                to: JobState::ClusterReady,
            });
        }
        let ctx = init_cluster_with_backend(self.config.mesh_shape.clone(), self.config.seed, backend)?;
        self.ctx = Some(ctx);
        self.transition(JobState::ClusterReady)
    }

    /// Run `circuit` from the current step (zero, or the restored
    /// checkpoint's step) to the end. Any error aborts the job.
    pub fn run(&mut self, circuit: &Circuit) -> ClusterResult<RunSummary> {
        if self.state != JobState::ClusterReady {
            return Err(ClusterError::InvalidTransition {
                from: self.state,
                to: JobState::Running,
            });
        }
        self.check_circuit(circuit)?;

        if self.sharded.is_none() {
            match self.initial_state() {
                Ok(state) => self.sharded = Some(state),
                Err(err) => {
                    self.abort(&err)?;
                    return Err(err);
                }
            }
        }
        self.transition(JobState::Running)?;

        match self.drive(circuit) {
            Ok(summary) => {
                self.transition(JobState::Completed)?;
                Ok(summary)
            }
            Err(err) => {
                self.abort(&err)?;
                Err(err)
            }
        }
    }

    fn check_circuit(&self, circuit: &Circuit) -> ClusterResult<()> {
        if circuit.num_qubits() != self.config.num_qubits {
            return Err(ClusterError::Validation(format!(
                "circuit has {} qubits, job has {}",
                circuit.num_qubits(),
                self.config.num_qubits
            )));
        }
        if circuit.has_noise() {
            return Err(ClusterError::Validation(
                "distributed jobs run unitary circuits only".into(),
            ));
        }
        Ok(())
    }

    fn initial_state(&self) -> ClusterResult<ShardedState> {
        let ctx = self.ctx()?;
        let sim = self.config.sim_config();
        let n = self.config.num_qubits;
        let state = if n <= sim.exact_threshold {
            QuantumState::zero_dense(n, sim.memory_ceiling_bytes)?
        } else {
            QuantumState::zero_mps(n, sim.truncation(), sim.budget)?
        };
        shard_state(ctx, &state)
    }

    fn ctx(&self) -> ClusterResult<&Context> {
        self.ctx
            .as_ref()
            .ok_or_else(|| ClusterError::Validation("cluster is not initialised".into()))
    }

    fn drive(&mut self, circuit: &Circuit) -> ClusterResult<RunSummary> {
        let ctx = self.ctx()?.clone();
        let mut sharded = self
            .sharded
            .take()
            .ok_or_else(|| ClusterError::Validation("no state to run".into()))?;
        let result = self.drive_state(&ctx, &mut sharded, circuit);
        self.sharded = Some(sharded);
        result
    }

    fn drive_state(
        &mut self,
        ctx: &Context,
        sharded: &mut ShardedState,
        circuit: &Circuit,
    ) -> ClusterResult<RunSummary> {
        let interval = self.config.checkpoint_interval;
        let timeout = Duration::from_millis(self.config.checkpoint_timeout_ms);
        let total = circuit.len() as u64;
        let mut boundary = Instant::now();
        let mut checkpoints = Vec::new();

        let start = sharded.step() as usize;
        for op in circuit.operations().iter().skip(start) {
            if self.cancel.is_cancelled() {
                return Err(ClusterError::Cancelled { step: sharded.step() });
            }
            if let Operation::Gate { gate, targets } = op {
                apply_distributed_gate(ctx, sharded, gate, targets)?;
            }

            let step = sharded.step();
            if interval > 0 && step % interval == 0 && step < total {
                let elapsed = boundary.elapsed();
                if !timeout.is_zero() && elapsed > timeout {
                    return Err(ClusterError::CheckpointTimeout {
                        elapsed_ms: elapsed.as_millis(),
                        timeout_ms: self.config.checkpoint_timeout_ms,
                    });
                }
                checkpoints.push(self.checkpoint(ctx, sharded)?);
                boundary = Instant::now();
            }
        }

        Ok(RunSummary {
            steps: sharded.step(),
            rounds: sharded.rounds(),
            checkpoints,
            truncation_error: sharded.truncation_error(),
        })
    }

    fn checkpoint(&mut self, ctx: &Context, sharded: &ShardedState) -> ClusterResult<PathBuf> {
        let root = self
            .config
            .checkpoint_path
            .clone()
            .ok_or_else(|| ClusterError::Validation("no checkpoint path configured".into()))?;
        self.transition(JobState::Checkpointed)?;
        let dir = checkpoint_save(ctx, sharded, &root)?;
        let removed = prune_generations(&root, self.config.keep_generations)?;
        if !removed.is_empty() {
            info!(?removed, "pruned old generations");
        }
        self.transition(JobState::Running)?;
        Ok(dir)
    }

    fn abort(&mut self, err: &ClusterError) -> ClusterResult<()> {
        let kind = err.kind();
        if kind.aborts_job() {
            error!(error = %err, ?kind, "job aborted");
        } else {
            warn!(error = %err, ?kind, "job aborted, retry possible");
        }
        self.last_error = Some(kind);
        self.transition(JobState::Aborted)
    }

    /// Restart every rank from the newest generation all ranks can load,
    /// or from the zero state when none exists.
    pub fn recover(&mut self) -> ClusterResult<u64> {
        self.recover_with_bond_dim(None)
    }

    /// Like `recover`, optionally raising the bond dimension first, which
    /// is the retry path after a truncation-budget abort.
    pub fn recover_with_bond_dim(&mut self, bond_dim: Option<usize>) -> ClusterResult<u64> {
        if self.state != JobState::Aborted {
            return Err(ClusterError::InvalidTransition {
                from: self.state,
                to: JobState::ClusterReady,
            });
        }
        if let Some(b) = bond_dim {
            self.config.bond_dim = b;
            self.config.validate()?;
        }

        let step = self.load_latest()?;
        self.cancel.reset();
        self.last_error = None;
        info!(step, "job recovered");
        self.transition(JobState::ClusterReady)?;
        Ok(step)
    }

    /// Pick up a previous launch's checkpoints before the first `run`.
    /// Returns the step execution will continue from.
    pub fn resume(&mut self) -> ClusterResult<u64> {
        if self.state != JobState::ClusterReady || self.sharded.is_some() {
            return Err(ClusterError::Validation(
                "resume needs a freshly initialised job".into(),
            ));
        }
        let step = self.load_latest()?;
        info!(step, "job resumed");
        Ok(step)
    }

    fn load_latest(&mut self) -> ClusterResult<u64> {
        let restored = match &self.config.checkpoint_path {
            Some(root) => match latest_consistent_generation(root)? {
                Some(generation) => Some(checkpoint_restore(self.ctx()?, &generation.path)?),
                None => None,
            },
            None => None,
        };
        if let Some(state) = &restored {
            if state.num_qubits() != self.config.num_qubits {
                return Err(ClusterError::Validation(format!(
                    "checkpoint holds {} qubits, job has {}",
                    state.num_qubits(),
                    self.config.num_qubits
                )));
            }
        }
        self.sharded = restored.map(|mut s| {
            s.set_max_bond(self.config.bond_dim);
            s
        });
        Ok(self.sharded.as_ref().map_or(0, |s| s.step()))
    }

    /// Global state reassembled from all shards.
    pub fn final_state(&self) -> ClusterResult<QuantumState> {
        let sharded = self
            .sharded
            .as_ref()
            .ok_or_else(|| ClusterError::Validation("job holds no state".into()))?;
        unshard(self.ctx()?, sharded)
    }
}
