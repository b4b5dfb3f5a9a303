use std::sync::Arc;

use backend::CpuBackend;
use cluster::{list_generations, ClusterError, ErrorKind, Job, JobConfig, JobState, MeshShape};
use quantum::{KrausChannel, QuantumState};
use simulator::{Circuit, SimConfig, Simulator};

const CEILING: u64 = 1 << 30;

fn mesh(dims: &[usize]) -> MeshShape {
    MeshShape::new(dims.to_vec()).unwrap()
}

fn ready(config: JobConfig) -> (Job, Arc<CpuBackend>) {
    let backend = Arc::new(CpuBackend::serial());
    let mut job = Job::new(config).unwrap();
    job.init_with_backend(backend.clone()).unwrap();
    (job, backend)
}

fn dense_reference(circuit: &Circuit) -> QuantumState {
    Simulator::new(SimConfig::default(), Arc::new(CpuBackend::serial()), 1)
        .unwrap()
        .run(circuit)
        .unwrap()
        .state
}

#[test]
fn lifecycle_with_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = JobConfig::new(4, mesh(&[2]), 11).with_checkpoints(dir.path(), 2);
    let (mut job, _) = ready(config);
    let summary = job.run(&Circuit::ghz(4).unwrap()).unwrap();

    assert_eq!(summary.steps, 4);
    assert_eq!(summary.checkpoints.len(), 1);
    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(
        job.history(),
        &[
            JobState::Uninitialized,
            JobState::ClusterReady,
            JobState::Running,
            JobState::Checkpointed,
            JobState::Running,
            JobState::Completed,
        ]
    );
    assert_eq!(list_generations(dir.path()).unwrap().len(), 1);

    let f = job
        .final_state()
        .unwrap()
        .fidelity(&dense_reference(&Circuit::ghz(4).unwrap()), CEILING)
        .unwrap();
    assert!((f - 1.0).abs() < 1e-12);
}

#[test]
fn run_requires_ready_cluster() {
    let mut job = Job::new(JobConfig::new(3, MeshShape::single(), 0)).unwrap();
    let err = job.run(&Circuit::ghz(3).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        ClusterError::InvalidTransition {
            from: JobState::Uninitialized,
            to: JobState::Running
        }
    ));
    assert!(job.recover().is_err());
}

#[test]
fn noisy_or_mismatched_circuits_are_rejected_up_front() {
    let (mut job, _) = ready(JobConfig::new(3, mesh(&[2]), 0));
    let mut noisy = Circuit::ghz(3).unwrap();
    noisy.add_noise(KrausChannel::bit_flip(0.1).unwrap(), &[0]).unwrap();
    assert_eq!(job.run(&noisy).unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(job.run(&Circuit::ghz(4).unwrap()).unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(job.state(), JobState::ClusterReady);
    job.run(&Circuit::ghz(3).unwrap()).unwrap();
}

#[test]
fn cancellation_aborts_between_gates() {
    let (mut job, _) = ready(JobConfig::new(4, mesh(&[2]), 0));
    job.cancel_handle().cancel();
    let err = job.run(&Circuit::ghz(4).unwrap()).unwrap_err();
    assert!(matches!(err, ClusterError::Cancelled { step: 0 }));
    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(job.last_error(), Some(ErrorKind::Cancelled));

    assert_eq!(job.recover().unwrap(), 0);
    assert_eq!(job.last_error(), None);
    job.run(&Circuit::ghz(4).unwrap()).unwrap();
    assert_eq!(job.state(), JobState::Completed);
}

#[test]
fn lost_rank_recovers_from_last_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let circuit = Circuit::brickwork(4, 2).unwrap().split_at(20).0;
    let config = JobConfig::new(4, mesh(&[2]), 3).with_checkpoints(dir.path(), 10);

    let (mut healthy, _) = ready(config.clone());
    healthy.run(&circuit).unwrap();
    let expected = healthy.final_state().unwrap().amplitudes(CEILING).unwrap();

    let (mut job, backend) = ready(config);
    backend.mark_unreachable(1);
    let err = job.run(&circuit).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    assert_eq!(job.state(), JobState::Aborted);

    // Restoring reads payloads only; the next split-axis gate fails again.
    assert_eq!(job.recover().unwrap(), 10);
    let err = job.run(&circuit).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    assert_eq!(job.sharded().map(|s| s.step()), Some(10));

    backend.mark_reachable(1);
    assert_eq!(job.recover().unwrap(), 10);
    let summary = job.run(&circuit).unwrap();
    assert_eq!(summary.steps, 20);
    assert!(summary.checkpoints.is_empty());
    assert_eq!(job.final_state().unwrap().amplitudes(CEILING).unwrap(), expected);
}

#[test]
fn budget_overrun_retries_with_larger_bond() {
    let dir = tempfile::tempdir().unwrap();
    let circuit = Circuit::brickwork(4, 2).unwrap();
    let config = JobConfig::new(4, mesh(&[2]), 5)
        .with_sim(SimConfig::default().with_exact_threshold(0))
        .with_bond_dim(1)
        .with_checkpoints(dir.path(), 4);
    let (mut job, _) = ready(config);

    let err = job.run(&circuit).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TruncationBudgetExceeded);
    assert!(err.is_recoverable());
    assert_eq!(job.last_error(), Some(ErrorKind::TruncationBudgetExceeded));
    let steps: Vec<u64> = list_generations(dir.path()).unwrap().iter().map(|g| g.step).collect();
    assert_eq!(steps, vec![4, 8]);

    assert_eq!(job.recover_with_bond_dim(Some(16)).unwrap(), 8);
    assert_eq!(job.config().bond_dim, 16);
    let summary = job.run(&circuit).unwrap();
    assert!(summary.truncation_error < 1e-9);

    let f = job
        .final_state()
        .unwrap()
        .fidelity(&dense_reference(&circuit), CEILING)
        .unwrap();
    assert!(f > 1.0 - 1e-9, "fidelity {}", f);
}

#[test]
fn mps_job_matches_single_process_mps() {
    let circuit = Circuit::brickwork(6, 3).unwrap();
    let sim = SimConfig::default().with_exact_threshold(0);
    let expected = Simulator::new(sim.clone(), Arc::new(CpuBackend::serial()), 1)
        .unwrap()
        .run(&circuit)
        .unwrap()
        .state
        .amplitudes(CEILING)
        .unwrap();

    let (mut job, _) = ready(JobConfig::new(6, mesh(&[2, 2]), 1).with_sim(sim));
    let summary = job.run(&circuit).unwrap();
    assert!(summary.rounds > 0);
    let got = job.final_state().unwrap();
    assert!(matches!(got, QuantumState::Mps(_)));
    for (a, b) in got.amplitudes(CEILING).unwrap().iter().zip(&expected) {
        assert!((a - b).norm() < 1e-10);
    }
}

#[test]
fn fresh_launch_resumes_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let circuit = Circuit::brickwork(5, 2).unwrap();
    let config = JobConfig::new(5, mesh(&[2]), 8).with_checkpoints(dir.path(), 7);

    let (mut first, _) = ready(config.clone());
    let summary = first.run(&circuit).unwrap();
    assert_eq!(summary.checkpoints.len(), (circuit.len() - 1) / 7);
    let expected = first.final_state().unwrap().amplitudes(CEILING).unwrap();

    let (mut second, _) = ready(config);
    let step = second.resume().unwrap();
    assert_eq!(step, 7 * ((circuit.len() as u64 - 1) / 7));
    second.run(&circuit).unwrap();
    assert_eq!(second.final_state().unwrap().amplitudes(CEILING).unwrap(), expected);
    assert!(second.resume().is_err());
}

#[test]
fn slow_checkpoint_boundary_aborts_as_lost_rank() {
    let dir = tempfile::tempdir().unwrap();
    let n = 20;
    let mut circuit = Circuit::new(n);
    for i in 0..40 {
        circuit.ry(0.05 * (i + 1) as f64, i % n).unwrap();
    }
    let config = JobConfig::new(n, mesh(&[2]), 4)
        .with_sim(SimConfig::default().with_exact_threshold(n))
        .with_checkpoints(dir.path(), 10);

    // A first launch leaves generation 10 behind.
    let (mut first, _) = ready(config.clone());
    first.run(&circuit.split_at(20).0).unwrap();
    let steps: Vec<u64> = list_generations(dir.path()).unwrap().iter().map(|g| g.step).collect();
    assert_eq!(steps, vec![10]);

    let (mut job, _) = ready(config.with_checkpoint_timeout_ms(1));
    assert_eq!(job.resume().unwrap(), 10);
    let err = job.run(&circuit).unwrap_err();
    assert!(matches!(err, ClusterError::CheckpointTimeout { timeout_ms: 1, .. }));
    assert_eq!(job.state(), JobState::Aborted);
    assert_eq!(job.last_error(), Some(ErrorKind::CommunicationFailure));
    assert_eq!(job.sharded().map(|s| s.step()), Some(20));

    assert_eq!(job.recover().unwrap(), 10);
    assert_eq!(job.state(), JobState::ClusterReady);
}

#[test]
fn bell_job_on_two_ranks() {
    let (mut job, _) = ready(JobConfig::new(2, mesh(&[2]), 0));
    job.run(&Circuit::bell().unwrap()).unwrap();
    let f = job
        .final_state()
        .unwrap()
        .fidelity(&dense_reference(&Circuit::bell().unwrap()), CEILING)
        .unwrap();
    assert!((f - 1.0).abs() < 1e-12);
}
