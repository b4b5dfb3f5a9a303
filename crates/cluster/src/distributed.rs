//! Gate application on a sharded state.
//!
//! Dense shards: a gate touching only local qubits runs on every shard in
//! parallel with no communication. For each split-axis target the engine
//! picks a free local qubit and swaps the two with one pairwise exchange
//! of half-shards between partner ranks (ranks whose index differs in the
//! split qubit's bit). The gate then runs locally and the swaps are undone
//! in reverse order. When there are not enough free local qubits (small
//! shards, wide gates) each group of ranks that differ only in the split
//! bits is gathered onto its lowest rank, the gate runs there on the
//! combined register, and the group is scattered back.
//!
//! MPS shards: the gate's working window (targets plus the path from the
//! orthogonality centre) is gathered to its lowest owning rank, updated
//! there and scattered back with the original site counts.

use backend::{ExchangePattern, C64};
use quantum::mps_ops::apply_gate_mps;
use quantum::statevector::apply_gate_local;
use quantum::Gate;
use rayon::prelude::*;
use tn::Mps;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::mesh::Context;
use crate::partition::BlockPartition;
use crate::sharded::{check_mesh, decode_sites, encode_sites, Shard, ShardKind, ShardedState};

/// Apply `gate` to global `targets`. The update is atomic per gate: on
/// error no shard has been modified, except after a communication failure,
/// which aborts the job.
pub fn apply_distributed_gate(
    ctx: &Context,
    state: &mut ShardedState,
    gate: &Gate,
    targets: &[usize],
) -> ClusterResult<()> {
    check_mesh(ctx, state)?;
    gate.check_targets(targets, state.num_qubits())?;
    match state.kind() {
        ShardKind::Dense => apply_dense(ctx, state, gate, targets)?,
        ShardKind::Mps => apply_mps(ctx, state, gate, targets)?,
    }
    state.advance();
    Ok(())
}

fn apply_dense(ctx: &Context, state: &mut ShardedState, gate: &Gate, targets: &[usize]) -> ClusterResult<()> {
    let part = state.block_partition()?;
    let split: Vec<usize> = targets.iter().copied().filter(|&q| part.is_split_axis(q)).collect();

    if split.is_empty() {
        let local: Vec<usize> = targets.iter().map(|&q| part.local_qubit(q)).collect();
        return apply_local(state, gate, &local);
    }

    let free: Vec<usize> = (part.global_bits()..part.num_qubits())
        .filter(|q| !targets.contains(q))
        .take(split.len())
        .collect();
    if free.len() < split.len() {
        return apply_gathered(ctx, state, &part, gate, targets, &split);
    }

    let pairs: Vec<(usize, usize)> = split.iter().copied().zip(free.iter().copied()).collect();
    let local: Vec<usize> = targets
        .iter()
        .map(|&q| {
            let q = pairs.iter().find(|(s, _)| *s == q).map_or(q, |(_, l)| *l);
            part.local_qubit(q)
        })
        .collect();

    for &(s, l) in &pairs {
        swap_split_axis(ctx, state, &part, s, l)?;
    }
    apply_local(state, gate, &local)?;
    for &(s, l) in pairs.iter().rev() {
        swap_split_axis(ctx, state, &part, s, l)?;
    }
    debug!(gate = gate.name(), ?targets, swaps = pairs.len(), "split-axis gate");
    Ok(())
}

fn apply_local(state: &mut ShardedState, gate: &Gate, local: &[usize]) -> ClusterResult<()> {
    state
        .shards_mut()
        .par_iter_mut()
        .map(|shard| match shard {
            Shard::Dense(amps) => apply_gate_local(amps, gate, local).map_err(ClusterError::from),
            Shard::Mps(_) => Err(ClusterError::Validation("expected a dense shard".into())),
        })
        .collect::<ClusterResult<Vec<()>>>()?;
    Ok(())
}

/// Collective fallback for split-axis gates. The combined register of a
/// group holds the split qubits (ascending) above the local qubits, so
/// member `k` of the group contributes block `k`.
fn apply_gathered(
    ctx: &Context,
    state: &mut ShardedState,
    part: &BlockPartition,
    gate: &Gate,
    targets: &[usize],
    split: &[usize],
) -> ClusterResult<()> {
    let world = part.world_size();
    let mut axes = split.to_vec();
    axes.sort_unstable();
    let m = axes.len();
    let mask = axes.iter().fold(0, |acc, &q| acc | part.rank_bit(q));

    let groups: Vec<Vec<usize>> = (0..world)
        .filter(|r| r & mask == 0)
        .map(|base| {
            (0..1usize << m)
                .map(|k| {
                    axes.iter().enumerate().fold(base, |rank, (j, &q)| {
                        if (k >> (m - 1 - j)) & 1 == 1 {
                            rank | part.rank_bit(q)
                        } else {
                            rank
                        }
                    })
                })
                .collect()
        })
        .collect();
    let local: Vec<usize> = targets
        .iter()
        .map(|&q| match axes.iter().position(|&a| a == q) {
            Some(j) => j,
            None => m + part.local_qubit(q),
        })
        .collect();

    let send: Vec<Vec<C64>> = state
        .shards()
        .iter()
        .map(|shard| match shard {
            Shard::Dense(amps) => amps.clone(),
            Shard::Mps(_) => Vec::new(),
        })
        .collect();
    let mut combined = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut recv = vec![Vec::new(); world];
        let gather = ExchangePattern::Gather {
            root: group[0],
            ranks: group.clone(),
        };
        ctx.backend().collective_exchange(&send, &mut recv, &gather)?;
        combined.push(std::mem::take(&mut recv[group[0]]));
    }
    state.add_round();

    combined
        .par_iter_mut()
        .map(|amps| apply_gate_local(amps, gate, &local).map_err(ClusterError::from))
        .collect::<ClusterResult<Vec<()>>>()?;

    // Shards are only replaced once every scatter has succeeded.
    let mut updated = vec![Vec::new(); world];
    for (group, amps) in groups.iter().zip(combined) {
        let mut send = vec![Vec::new(); world];
        send[group[0]] = amps;
        let mut recv = vec![Vec::new(); world];
        let scatter = ExchangePattern::Scatter {
            root: group[0],
            ranks: group.clone(),
            counts: vec![part.shard_len(); group.len()],
        };
        ctx.backend().collective_exchange(&send, &mut recv, &scatter)?;
        for &rank in group {
            updated[rank] = std::mem::take(&mut recv[rank]);
        }
    }
    state.add_round();
    for (shard, amps) in state.shards_mut().iter_mut().zip(updated) {
        *shard = Shard::Dense(amps);
    }
    debug!(gate = gate.name(), ?targets, groups = groups.len(), "gathered split-axis gate");
    Ok(())
}

/// Exchange the roles of split qubit `s` and local qubit `l`. A rank whose
/// bit for `s` is `b` sends the half of its shard where `l != b` to its
/// partner and stores the partner's matching half in the same slots.
fn swap_split_axis(
    ctx: &Context,
    state: &mut ShardedState,
    part: &BlockPartition,
    s: usize,
    l: usize,
) -> ClusterResult<()> {
    let world = part.world_size();
    let rank_bit = part.rank_bit(s);
    let local_bit = 1usize << (part.num_qubits() - 1 - l);
    let outgoing = |rank: usize, i: usize| ((i & local_bit) != 0) != ((rank & rank_bit) != 0);

    let send: Vec<Vec<C64>> = state
        .shards()
        .iter()
        .enumerate()
        .map(|(rank, shard)| match shard {
            Shard::Dense(amps) => amps
                .iter()
                .enumerate()
                .filter(|(i, _)| outgoing(rank, *i))
                .map(|(_, a)| *a)
                .collect(),
            Shard::Mps(_) => Vec::new(),
        })
        .collect();
    let mut recv = vec![Vec::new(); world];
    let pattern = ExchangePattern::Pairwise {
        partners: (0..world).map(|r| r ^ rank_bit).collect(),
    };
    ctx.backend().collective_exchange(&send, &mut recv, &pattern)?;

    for (rank, (shard, incoming)) in state.shards_mut().iter_mut().zip(recv).enumerate() {
        if let Shard::Dense(amps) = shard {
            let slots = (0..amps.len()).filter(|&i| outgoing(rank, i));
            for (i, a) in slots.zip(incoming) {
                amps[i] = a;
            }
        }
    }
    state.add_round();
    debug!(split = s, local = l, "pairwise half-shard exchange");
    Ok(())
}

fn apply_mps(ctx: &Context, state: &mut ShardedState, gate: &Gate, targets: &[usize]) -> ClusterResult<()> {
    let part = state.site_partition()?;
    let meta = state
        .mps_meta()
        .cloned()
        .ok_or_else(|| ClusterError::Validation("MPS shards without chain metadata".into()))?;

    // Single-site gates leave the centre where it is.
    let single = gate.num_qubits() == 1;
    let mut lo = targets.iter().copied().min().unwrap_or(0);
    let mut hi = targets.iter().copied().max().unwrap_or(0);
    if !single {
        lo = lo.min(meta.center);
        hi = hi.max(meta.center);
    }
    let owners = part.owners(lo, hi);
    let root = owners.start;
    let first_site = part.range(root).start;

    // Window covers whole shards of the owning ranks.
    let mut window_sites = Vec::new();
    let mut counts = Vec::new();
    if owners.len() == 1 {
        if let Shard::Mps(sites) = &state.shards()[root] {
            counts.push(sites.len());
            window_sites = sites.clone();
        }
    } else {
        let world = state.world_size();
        let mut send = vec![Vec::new(); world];
        for rank in owners.clone() {
            if let Shard::Mps(sites) = &state.shards()[rank] {
                counts.push(sites.len());
                encode_sites(sites, &mut send[rank]);
            }
        }
        let mut recv = vec![Vec::new(); world];
        let gather = ExchangePattern::Gather {
            root,
            ranks: owners.clone().collect(),
        };
        ctx.backend().collective_exchange(&send, &mut recv, &gather)?;
        state.add_round();
        window_sites = decode_sites(&recv[root])?;
    }

    let window_center = if single { 0 } else { meta.center - first_site };
    let mut window = Mps::from_parts(window_sites, window_center, meta.truncation, meta.budget)?;
    let local: Vec<usize> = targets.iter().map(|&q| q - first_site).collect();
    let discarded = apply_gate_mps(&mut window, ctx.backend(), gate, &local)?;
    let (sites, center, budget) = window.into_parts();

    if owners.len() == 1 {
        state.shards_mut()[root] = Shard::Mps(sites);
    } else {
        let world = state.world_size();
        let mut send = vec![Vec::new(); world];
        let mut wire_counts = Vec::with_capacity(counts.len());
        let mut offset = 0;
        for &count in &counts {
            let before = send[root].len();
            encode_sites(&sites[offset..offset + count], &mut send[root]);
            wire_counts.push(send[root].len() - before);
            offset += count;
        }
        let mut recv = vec![Vec::new(); world];
        let scatter = ExchangePattern::Scatter {
            root,
            ranks: owners.clone().collect(),
            counts: wire_counts,
        };
        ctx.backend().collective_exchange(&send, &mut recv, &scatter)?;
        state.add_round();
        for rank in owners.clone() {
            state.shards_mut()[rank] = Shard::Mps(decode_sites(&recv[rank])?);
        }
    }

    if !single {
        if let Some(m) = state.mps_meta_mut() {
            m.center = center + first_site;
            m.budget = budget;
        }
    }
    debug!(
        gate = gate.name(),
        ?targets,
        ranks = owners.len(),
        discarded,
        "mps window update"
    );
    Ok(())
}
