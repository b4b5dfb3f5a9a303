use backend::{ExchangePattern, C64};
use quantum::{QuantumState, RepresentationKind, StateVector};
use serde::{Deserialize, Serialize};
use tn::{Mps, Tensor3, Truncation, TruncationBudget};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::mesh::{Context, MeshShape};
use crate::partition::{BlockPartition, SitePartition};

/// Representation of a sharded state; density matrices are never sharded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    Dense,
    Mps,
}

/// One rank's exclusively owned part of the global state.
#[derive(Clone, Debug, PartialEq)]
pub enum Shard {
    /// Amplitudes of the rank's contiguous index block.
    Dense(Vec<C64>),
    /// The rank's contiguous run of site tensors.
    Mps(Vec<Tensor3>),
}

impl Shard {
    pub fn kind(&self) -> ShardKind {
        match self {
            Self::Dense(_) => ShardKind::Dense,
            Self::Mps(_) => ShardKind::Mps,
        }
    }
}

/// Chain-wide MPS bookkeeping that no single shard owns.
#[derive(Clone, Debug, PartialEq)]
pub struct MpsMeta {
    pub center: usize,
    pub truncation: Truncation,
    pub budget: TruncationBudget,
}

#[derive(Clone, Debug)]
pub struct ShardedState {
    num_qubits: usize,
    mesh: MeshShape,
    shards: Vec<Shard>,
    mps: Option<MpsMeta>,
    steps: Vec<u64>,
    rounds: u64,
}

impl ShardedState {
    pub(crate) fn from_parts(
        num_qubits: usize,
        mesh: MeshShape,
        shards: Vec<Shard>,
        mps: Option<MpsMeta>,
        step: u64,
    ) -> ClusterResult<Self> {
        let world = mesh.world_size();
        if shards.len() != world {
            return Err(ClusterError::Validation(format!(
                "{} shards for a world of {}",
                shards.len(),
                world
            )));
        }
        let kind = shards[0].kind();
        if shards.iter().any(|s| s.kind() != kind) || (kind == ShardKind::Mps) != mps.is_some() {
            return Err(ClusterError::Validation("shards mix representations".into()));
        }
        Ok(Self {
            num_qubits,
            mesh,
            shards,
            mps,
            steps: vec![step; world],
            rounds: 0,
        })
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn mesh(&self) -> &MeshShape {
        &self.mesh
    }

    pub fn world_size(&self) -> usize {
        self.shards.len()
    }

    pub fn kind(&self) -> ShardKind {
        self.shards[0].kind()
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn shard(&self, rank: usize) -> Option<&Shard> {
        self.shards.get(rank)
    }

    pub(crate) fn shards_mut(&mut self) -> &mut [Shard] {
        &mut self.shards
    }

    pub fn mps_meta(&self) -> Option<&MpsMeta> {
        self.mps.as_ref()
    }

    pub(crate) fn mps_meta_mut(&mut self) -> Option<&mut MpsMeta> {
        self.mps.as_mut()
    }

    /// Gates applied so far, as seen by rank 0.
    pub fn step(&self) -> u64 {
        self.steps[0]
    }

    /// Per-rank step counters; equal whenever ranks are in lock-step.
    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    pub(crate) fn advance(&mut self) {
        for s in self.steps.iter_mut() {
            *s += 1;
        }
    }

    /// Collective rounds performed by gates so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub(crate) fn add_round(&mut self) {
        self.rounds += 1;
    }

    /// Raise (or lower) the MPS bond cap for future gates. No-op for dense
    /// shards.
    pub fn set_max_bond(&mut self, bond_dim: usize) {
        if let Some(meta) = self.mps.as_mut() {
            meta.truncation.max_bond = bond_dim;
        }
    }

    pub fn truncation_error(&self) -> f64 {
        self.mps.as_ref().map_or(0.0, |m| m.budget.accumulated())
    }

    pub fn block_partition(&self) -> ClusterResult<BlockPartition> {
        BlockPartition::new(self.num_qubits, self.world_size())
    }

    pub fn site_partition(&self) -> ClusterResult<SitePartition> {
        SitePartition::new(self.num_qubits, self.world_size())
    }
}

/// Distribute `state` over the mesh: rank 0 holds the global state and
/// scatters each rank its block.
pub fn shard_state(ctx: &Context, state: &QuantumState) -> ClusterResult<ShardedState> {
    let world = ctx.world_size();
    let n = state.num_qubits();
    let root = ctx.global_rank();
    let mut send = vec![Vec::new(); world];
    let mut recv = vec![Vec::new(); world];

    let sharded = match state {
        QuantumState::Pure(psi) => {
            let part = BlockPartition::new(n, world)?;
            send[root] = psi.amplitudes().to_vec();
            let pattern = ExchangePattern::Scatter {
                root,
                ranks: (0..world).collect(),
                counts: vec![part.shard_len(); world],
            };
            ctx.backend().collective_exchange(&send, &mut recv, &pattern)?;
            let shards = recv.into_iter().map(Shard::Dense).collect();
            ShardedState::from_parts(n, ctx.mesh().clone(), shards, None, 0)?
        }
        QuantumState::Mps(mps) => {
            let part = SitePartition::new(n, world)?;
            let mut counts = Vec::with_capacity(world);
            for rank in 0..world {
                let before = send[root].len();
                encode_sites(&mps.sites()[part.range(rank)], &mut send[root]);
                counts.push(send[root].len() - before);
            }
            let pattern = ExchangePattern::Scatter {
                root,
                ranks: (0..world).collect(),
                counts,
            };
            ctx.backend().collective_exchange(&send, &mut recv, &pattern)?;
            let shards = recv
                .iter()
                .map(|wire| decode_sites(wire).map(Shard::Mps))
                .collect::<ClusterResult<Vec<_>>>()?;
            let meta = MpsMeta {
                center: mps.center(),
                truncation: mps.truncation(),
                budget: mps.budget().clone(),
            };
            ShardedState::from_parts(n, ctx.mesh().clone(), shards, Some(meta), 0)?
        }
        QuantumState::Mixed(_) => {
            return Err(ClusterError::Validation(
                "density matrices cannot be sharded".into(),
            ))
        }
    };
    debug!(num_qubits = n, world, kind = ?sharded.kind(), "state sharded");
    Ok(sharded)
}

/// Inverse of `shard_state`: gather every shard to rank 0 in rank order
/// and rebuild the global state.
pub fn unshard(ctx: &Context, state: &ShardedState) -> ClusterResult<QuantumState> {
    check_mesh(ctx, state)?;
    let world = ctx.world_size();
    let root = ctx.global_rank();
    let send: Vec<Vec<C64>> = state
        .shards()
        .iter()
        .map(|shard| match shard {
            Shard::Dense(amps) => amps.clone(),
            Shard::Mps(sites) => {
                let mut wire = Vec::new();
                encode_sites(sites, &mut wire);
                wire
            }
        })
        .collect();
    let mut recv = vec![Vec::new(); world];
    let pattern = ExchangePattern::Gather {
        root,
        ranks: (0..world).collect(),
    };
    ctx.backend().collective_exchange(&send, &mut recv, &pattern)?;
    let gathered = std::mem::take(&mut recv[root]);

    match state.mps_meta() {
        None => Ok(QuantumState::Pure(StateVector::unnormalized(gathered)?)),
        Some(meta) => {
            let mps = Mps::from_parts(
                decode_sites(&gathered)?,
                meta.center,
                meta.truncation,
                meta.budget.clone(),
            )?;
            Ok(QuantumState::Mps(mps))
        }
    }
}

pub(crate) fn check_mesh(ctx: &Context, state: &ShardedState) -> ClusterResult<()> {
    if ctx.mesh() != state.mesh() {
        return Err(ClusterError::ShapeMismatch {
            expected: ctx.mesh().dims().to_vec(),
            found: state.mesh().dims().to_vec(),
        });
    }
    Ok(())
}

impl From<ShardKind> for RepresentationKind {
    fn from(kind: ShardKind) -> Self {
        match kind {
            ShardKind::Dense => RepresentationKind::Dense,
            ShardKind::Mps => RepresentationKind::Mps,
        }
    }
}

/// Site tensors on the complex wire: per site a header `(dl, dp) (dr, 0)`
/// followed by the tensor data.
pub(crate) fn encode_sites(sites: &[Tensor3], out: &mut Vec<C64>) {
    for s in sites {
        out.push(C64::new(s.dl as f64, s.dp as f64));
        out.push(C64::new(s.dr as f64, 0.0));
        out.extend_from_slice(&s.data);
    }
}

pub(crate) fn decode_sites(wire: &[C64]) -> ClusterResult<Vec<Tensor3>> {
    let mut sites = Vec::new();
    let mut pos = 0;
    while pos < wire.len() {
        if pos + 2 > wire.len() {
            return Err(ClusterError::Validation("truncated site header".into()));
        }
        let dims = [wire[pos].re, wire[pos].im, wire[pos + 1].re];
        if dims.iter().any(|d| *d < 1.0 || d.fract() != 0.0) {
            return Err(ClusterError::Validation(format!("bad site header {:?}", dims)));
        }
        let (dl, dp, dr) = (dims[0] as usize, dims[1] as usize, dims[2] as usize);
        pos += 2;
        let len = dl * dp * dr;
        if pos + len > wire.len() {
            return Err(ClusterError::Validation("truncated site payload".into()));
        }
        let mut t = Tensor3::zeros(dl, dp, dr);
        t.data.copy_from_slice(&wire[pos..pos + len]);
        sites.push(t);
        pos += len;
    }
    Ok(sites)
}
