use std::fs;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use backend::{ComputeBackend, CpuBackend, C64};
use cluster::{
    apply_distributed_gate, checkpoint_restore, checkpoint_save, init_cluster, init_cluster_with_backend,
    latest_consistent_generation, list_generations, prune_generations, shard_state, unshard, ClusterError,
    Context, ErrorKind, MeshShape, Shard, ShardedState,
};
use quantum::entropy::entanglement_entropy;
use quantum::{Gate, QuantumState};
use simulator::{Circuit, Operation, SimConfig, Simulator};
use tn::{BudgetConfig, Truncation};

const CEILING: u64 = 1 << 30;

fn ctx(dims: &[usize]) -> Context {
    init_cluster(MeshShape::new(dims.to_vec()).unwrap(), 99).unwrap()
}

fn run_sharded(ctx: &Context, state: &mut ShardedState, circuit: &Circuit) {
    for op in circuit.operations() {
        if let Operation::Gate { gate, targets } = op {
            apply_distributed_gate(ctx, state, gate, targets).unwrap();
        }
    }
}

fn reference(circuit: &Circuit, config: SimConfig) -> QuantumState {
    Simulator::new(config, Arc::new(CpuBackend::serial()), 99)
        .unwrap()
        .run(circuit)
        .unwrap()
        .state
}

fn assert_close(a: &[C64], b: &[C64], tol: f64) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).norm() < tol, "{} vs {}", x, y);
    }
}

#[test]
fn ghz_entropy_on_two_ranks() {
    let ctx = ctx(&[2, 1]);
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(3, CEILING).unwrap()).unwrap();
    run_sharded(&ctx, &mut state, &Circuit::ghz(3).unwrap());
    assert_eq!(state.step(), 3);

    let global = unshard(&ctx, &state).unwrap();
    let s = entanglement_entropy(&global, &[0], ctx.backend(), CEILING).unwrap();
    assert_abs_diff_eq!(s, 1.0, epsilon = 1e-10);
}

#[test]
fn dense_result_independent_of_mesh() {
    let circuit = Circuit::brickwork(6, 4).unwrap();
    let expected = reference(&circuit, SimConfig::default()).amplitudes(CEILING).unwrap();

    for dims in [vec![1], vec![2], vec![2, 2]] {
        let ctx = ctx(&dims);
        let mut state = shard_state(&ctx, &QuantumState::zero_dense(6, CEILING).unwrap()).unwrap();
        run_sharded(&ctx, &mut state, &circuit);
        let got = unshard(&ctx, &state).unwrap().amplitudes(CEILING).unwrap();
        assert_close(&got, &expected, 1e-12);
    }
}

#[test]
fn split_axis_gates_count_rounds() {
    let ctx = ctx(&[2]);
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(4, CEILING).unwrap()).unwrap();
    apply_distributed_gate(&ctx, &mut state, &Gate::h(), &[3]).unwrap();
    assert_eq!(state.rounds(), 0);
    // One swap in, one swap out.
    apply_distributed_gate(&ctx, &mut state, &Gate::h(), &[0]).unwrap();
    assert_eq!(state.rounds(), 2);
}

#[test]
fn toffoli_across_ranks_matches_dense() {
    let mut circuit = Circuit::new(5);
    circuit.h(0).unwrap().h(1).unwrap().x(4).unwrap();
    circuit.add_gate(Gate::toffoli(), &[0, 1, 4]).unwrap();
    circuit.add_gate(Gate::toffoli(), &[4, 2, 0]).unwrap();
    let expected = reference(&circuit, SimConfig::default()).amplitudes(CEILING).unwrap();

    let ctx = ctx(&[2]);
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(5, CEILING).unwrap()).unwrap();
    run_sharded(&ctx, &mut state, &circuit);
    let got = unshard(&ctx, &state).unwrap().amplitudes(CEILING).unwrap();
    assert_close(&got, &expected, 1e-12);
}

#[test]
fn sharded_mps_matches_single_process() {
    let circuit = Circuit::brickwork(6, 3).unwrap();
    let config = SimConfig::default().with_exact_threshold(0);
    let expected = reference(&circuit, config.clone()).amplitudes(CEILING).unwrap();

    for dims in [vec![2], vec![4]] {
        let ctx = ctx(&dims);
        let zero = QuantumState::zero_mps(6, config.truncation(), config.budget).unwrap();
        let mut state = shard_state(&ctx, &zero).unwrap();
        run_sharded(&ctx, &mut state, &circuit);
        let got = unshard(&ctx, &state).unwrap();
        assert!(matches!(got, QuantumState::Mps(_)));
        assert_close(&got.amplitudes(CEILING).unwrap(), &expected, 1e-10);
    }
}

#[test]
fn shard_then_unshard_is_identity() {
    let state = reference(&Circuit::brickwork(5, 2).unwrap(), SimConfig::default());
    let ctx = ctx(&[4]);
    let sharded = shard_state(&ctx, &state).unwrap();
    assert_eq!(sharded.world_size(), 4);
    match sharded.shard(3) {
        Some(Shard::Dense(amps)) => assert_eq!(amps.len(), 8),
        other => panic!("unexpected shard {:?}", other),
    }
    let back = unshard(&ctx, &sharded).unwrap();
    assert_eq!(back.amplitudes(CEILING).unwrap(), state.amplitudes(CEILING).unwrap());
}

#[test]
fn too_many_ranks_for_qubits() {
    let ctx = ctx(&[4]);
    let err = shard_state(&ctx, &QuantumState::zero_dense(2, CEILING).unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unreachable_partner_fails_without_touching_shards() {
    let backend = Arc::new(CpuBackend::serial());
    let dyn_backend: Arc<dyn ComputeBackend> = backend.clone();
    let ctx = init_cluster_with_backend(MeshShape::new(vec![2]).unwrap(), 5, dyn_backend).unwrap();
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(4, CEILING).unwrap()).unwrap();
    apply_distributed_gate(&ctx, &mut state, &Gate::h(), &[2]).unwrap();
    let before: Vec<Shard> = state.shards().to_vec();

    backend.mark_unreachable(1);
    // Local gates need no exchange.
    apply_distributed_gate(&ctx, &mut state, &Gate::x(), &[3]).unwrap();
    let mid: Vec<Shard> = state.shards().to_vec();
    assert_ne!(mid, before);

    let err = apply_distributed_gate(&ctx, &mut state, &Gate::h(), &[0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    assert_eq!(state.shards(), &mid[..]);
    assert_eq!(state.step(), 2);
}

#[test]
fn checkpoint_restore_replays_to_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let circuit = Circuit::brickwork(5, 2).unwrap().split_at(20).0;
    let (head, tail) = circuit.split_at(10);

    let ctx = ctx(&[2]);
    let mut live = shard_state(&ctx, &QuantumState::zero_dense(5, CEILING).unwrap()).unwrap();
    run_sharded(&ctx, &mut live, &head);
    let gen = checkpoint_save(&ctx, &live, dir.path()).unwrap();
    assert!(gen.ends_with("gen-0000000010"));
    run_sharded(&ctx, &mut live, &tail);

    let fresh = init_cluster(MeshShape::new(vec![2]).unwrap(), 99).unwrap();
    let mut restored = checkpoint_restore(&fresh, &gen).unwrap();
    assert_eq!(restored.step(), 10);
    run_sharded(&fresh, &mut restored, &tail);
    assert_eq!(restored.step(), 20);
    assert_eq!(restored.shards(), live.shards());
}

#[test]
fn mps_checkpoint_keeps_chain_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx(&[2]);
    let zero = QuantumState::zero_mps(6, Truncation::default(), BudgetConfig::default()).unwrap();
    let mut state = shard_state(&ctx, &zero).unwrap();
    run_sharded(&ctx, &mut state, &Circuit::brickwork(6, 2).unwrap());

    let gen = checkpoint_save(&ctx, &state, dir.path()).unwrap();
    let restored = checkpoint_restore(&ctx, &gen).unwrap();
    assert_eq!(restored.mps_meta(), state.mps_meta());
    assert_eq!(restored.shards(), state.shards());
    assert_eq!(restored.step(), state.step());
}

#[test]
fn restore_on_other_mesh_is_shape_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let ctx2 = ctx(&[2]);
    let state = shard_state(&ctx2, &QuantumState::zero_dense(4, CEILING).unwrap()).unwrap();
    let gen = checkpoint_save(&ctx2, &state, dir.path()).unwrap();

    let err = checkpoint_restore(&ctx(&[4]), &gen).unwrap_err();
    assert!(matches!(err, ClusterError::ShapeMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
}

#[test]
fn corrupted_generation_falls_back_to_older_one() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx(&[2]);
    let circuit = Circuit::ghz(4).unwrap();
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(4, CEILING).unwrap()).unwrap();
    let mut gens = Vec::new();
    for op in circuit.operations() {
        if let Operation::Gate { gate, targets } = op {
            apply_distributed_gate(&ctx, &mut state, gate, targets).unwrap();
        }
        gens.push(checkpoint_save(&ctx, &state, dir.path()).unwrap());
    }
    assert_eq!(list_generations(dir.path()).unwrap().len(), 4);

    let payload = gens[3].join("rank-00001.bin");
    let mut bytes = fs::read(&payload).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&payload, bytes).unwrap();

    let err = checkpoint_restore(&ctx, &gens[3]).unwrap_err();
    assert!(matches!(err, ClusterError::Corrupt { .. }));
    let latest = latest_consistent_generation(dir.path()).unwrap().unwrap();
    assert_eq!(latest.step, 3);

    let removed = prune_generations(dir.path(), 2).unwrap();
    assert_eq!(removed, vec![1, 2]);
    let steps: Vec<u64> = list_generations(dir.path())
        .unwrap()
        .into_iter()
        .map(|g| g.step)
        .collect();
    assert_eq!(steps, vec![3, 4]);
}

#[test]
fn bell_pair_split_over_two_ranks() {
    let circuit = Circuit::bell().unwrap();
    let expected = reference(&circuit, SimConfig::default()).amplitudes(CEILING).unwrap();

    let ctx = ctx(&[2]);
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(2, CEILING).unwrap()).unwrap();
    run_sharded(&ctx, &mut state, &circuit);
    let got = unshard(&ctx, &state).unwrap().amplitudes(CEILING).unwrap();
    assert_close(&got, &expected, 1e-12);
    assert!(state.rounds() > 0);
}

#[test]
fn wide_gates_with_few_local_qubits_match_dense() {
    let mut circuit = Circuit::new(4);
    circuit.h(0).unwrap().h(1).unwrap().ry(0.4, 3).unwrap();
    circuit.add_gate(Gate::toffoli(), &[0, 1, 2]).unwrap();
    circuit.add_gate(Gate::toffoli(), &[3, 2, 1]).unwrap();
    circuit.cnot(2, 0).unwrap().cz(1, 0).unwrap();
    let expected = reference(&circuit, SimConfig::default()).amplitudes(CEILING).unwrap();

    for dims in [vec![4], vec![2, 2], vec![8]] {
        let ctx = ctx(&dims);
        let mut state = shard_state(&ctx, &QuantumState::zero_dense(4, CEILING).unwrap()).unwrap();
        run_sharded(&ctx, &mut state, &circuit);
        let got = unshard(&ctx, &state).unwrap().amplitudes(CEILING).unwrap();
        assert_close(&got, &expected, 1e-12);
    }
}

#[test]
fn gathered_gate_is_atomic_on_lost_rank() {
    let backend = Arc::new(CpuBackend::serial());
    let dyn_backend: Arc<dyn ComputeBackend> = backend.clone();
    let ctx = init_cluster_with_backend(MeshShape::new(vec![4]).unwrap(), 5, dyn_backend).unwrap();
    let mut state = shard_state(&ctx, &QuantumState::zero_dense(3, CEILING).unwrap()).unwrap();
    apply_distributed_gate(&ctx, &mut state, &Gate::h(), &[2]).unwrap();
    let before: Vec<Shard> = state.shards().to_vec();

    backend.mark_unreachable(3);
    let err = apply_distributed_gate(&ctx, &mut state, &Gate::toffoli(), &[2, 0, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommunicationFailure);
    assert_eq!(state.shards(), &before[..]);
    assert_eq!(state.step(), 1);
}
