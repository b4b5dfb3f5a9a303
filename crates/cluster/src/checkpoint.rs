//! Checkpoint generations.
//!
//! ```text
//! <root>/gen-<step:010>/rank-<rank:05>.bin   one payload per rank
//! <root>/gen-<step:010>/metadata.json        written last by rank 0
//! ```
//!
//! A generation without `metadata.json` is incomplete and never restored.
//! Payloads are little-endian: magic `QSHD`, format version, rank id, kind
//! byte, then either the amplitude count and `(re, im)` pairs, or the site
//! count and per site `dl dp dr` followed by the tensor data.

use std::fs;
use std::path::{Path, PathBuf};

use backend::{ExchangePattern, C64};
use rayon::prelude::*;
use rng::digest_hex;
use serde::{Deserialize, Serialize};
use tn::{Tensor3, Truncation, TruncationBudget};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::mesh::Context;
use crate::sharded::{check_mesh, MpsMeta, Shard, ShardKind, ShardedState};

pub const FORMAT_VERSION: u32 = 1;
const MAGIC: &[u8; 4] = b"QSHD";
const METADATA_FILE: &str = "metadata.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub mesh_shape: Vec<usize>,
    pub world_size: usize,
    pub global_seed: u64,
    pub qubit_count: usize,
    pub representation_kind: ShardKind,
    /// `None` for dense states.
    pub bond_dim: Option<usize>,
    pub svd_cutoff: Option<f64>,
    pub center: Option<usize>,
    pub step_counter: u64,
    pub truncation_error_budget: f64,
    pub budget: Option<TruncationBudget>,
    /// Digest of each rank's payload, by rank.
    pub rank_digests: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub step: u64,
    pub path: PathBuf,
    /// Metadata present.
    pub complete: bool,
}

pub fn generation_dir(root: &Path, step: u64) -> PathBuf {
    root.join(format!("gen-{:010}", step))
}

fn rank_file(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("rank-{:05}.bin", rank))
}

/// Barrier on the step counter: rank 0 gathers every rank's counter and
/// they must all agree.
pub fn agree_on_step(ctx: &Context, state: &ShardedState) -> ClusterResult<u64> {
    let world = ctx.world_size();
    let root = ctx.global_rank();
    let send: Vec<Vec<C64>> = state
        .steps()
        .iter()
        .map(|&s| vec![C64::new(s as f64, 0.0)])
        .collect();
    let mut recv = vec![Vec::new(); world];
    let pattern = ExchangePattern::Gather {
        root,
        ranks: (0..world).collect(),
    };
    ctx.backend().collective_exchange(&send, &mut recv, &pattern)?;
    let steps: Vec<u64> = recv[root].iter().map(|z| z.re as u64).collect();
    match steps.first() {
        Some(&first) if steps.iter().all(|&s| s == first) => Ok(first),
        _ => Err(ClusterError::StepDisagreement { steps }),
    }
}

/// Write the current generation under `root` and return its directory.
pub fn checkpoint_save(ctx: &Context, state: &ShardedState, root: &Path) -> ClusterResult<PathBuf> {
    check_mesh(ctx, state)?;
    let step = agree_on_step(ctx, state)?;
    let dir = generation_dir(root, step);
    fs::create_dir_all(&dir).map_err(|e| ClusterError::io(&dir, e))?;

    let rank_digests = state
        .shards()
        .par_iter()
        .enumerate()
        .map(|(rank, shard)| -> ClusterResult<String> {
            let bytes = encode_payload(rank, shard);
            let path = rank_file(&dir, rank);
            fs::write(&path, &bytes).map_err(|e| ClusterError::io(&path, e))?;
            Ok(digest_hex(&bytes))
        })
        .collect::<ClusterResult<Vec<_>>>()?;

    let meta = state.mps_meta();
    let metadata = CheckpointMetadata {
        format_version: FORMAT_VERSION,
        mesh_shape: ctx.mesh().dims().to_vec(),
        world_size: ctx.world_size(),
        global_seed: ctx.global_seed(),
        qubit_count: state.num_qubits(),
        representation_kind: state.kind(),
        bond_dim: meta.map(|m| m.truncation.max_bond),
        svd_cutoff: meta.map(|m| m.truncation.cutoff),
        center: meta.map(|m| m.center),
        step_counter: step,
        truncation_error_budget: state.truncation_error(),
        budget: meta.map(|m| m.budget.clone()),
        rank_digests,
    };
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    let final_path = dir.join(METADATA_FILE);
    fs::write(&tmp, serde_json::to_string_pretty(&metadata)?).map_err(|e| ClusterError::io(&tmp, e))?;
    fs::rename(&tmp, &final_path).map_err(|e| ClusterError::io(&final_path, e))?;

    info!(step, dir = %dir.display(), ranks = ctx.world_size(), "checkpoint written");
    Ok(dir)
}

pub fn read_metadata(dir: &Path) -> ClusterResult<CheckpointMetadata> {
    let path = dir.join(METADATA_FILE);
    let text = fs::read_to_string(&path).map_err(|e| ClusterError::io(&path, e))?;
    let metadata: CheckpointMetadata = serde_json::from_str(&text)?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(ClusterError::Corrupt {
            path,
            reason: format!("unsupported format version {}", metadata.format_version),
        });
    }
    Ok(metadata)
}

/// Restore generation `dir`. The mesh must match the context exactly;
/// each rank then loads only its own payload.
pub fn checkpoint_restore(ctx: &Context, dir: &Path) -> ClusterResult<ShardedState> {
    let metadata = read_metadata(dir)?;
    if metadata.mesh_shape != ctx.mesh().dims() {
        return Err(ClusterError::ShapeMismatch {
            expected: ctx.mesh().dims().to_vec(),
            found: metadata.mesh_shape,
        });
    }
    if metadata.rank_digests.len() != ctx.world_size() {
        return Err(ClusterError::Corrupt {
            path: dir.join(METADATA_FILE),
            reason: format!(
                "{} rank digests for {} ranks",
                metadata.rank_digests.len(),
                ctx.world_size()
            ),
        });
    }

    let shards = (0..ctx.world_size())
        .into_par_iter()
        .map(|rank| load_shard(dir, rank, &metadata))
        .collect::<ClusterResult<Vec<_>>>()?;

    let mps = match metadata.representation_kind {
        ShardKind::Dense => None,
        ShardKind::Mps => Some(MpsMeta {
            center: metadata.center.unwrap_or(0),
            truncation: Truncation {
                max_bond: metadata.bond_dim.unwrap_or(Truncation::default().max_bond),
                cutoff: metadata.svd_cutoff.unwrap_or(Truncation::default().cutoff),
            },
            budget: metadata.budget.clone().unwrap_or_default(),
        }),
    };
    let state = ShardedState::from_parts(
        metadata.qubit_count,
        ctx.mesh().clone(),
        shards,
        mps,
        metadata.step_counter,
    )?;
    info!(step = metadata.step_counter, dir = %dir.display(), "checkpoint restored");
    Ok(state)
}

fn load_shard(dir: &Path, rank: usize, metadata: &CheckpointMetadata) -> ClusterResult<Shard> {
    let path = rank_file(dir, rank);
    let bytes = fs::read(&path).map_err(|e| ClusterError::io(&path, e))?;
    if digest_hex(&bytes) != metadata.rank_digests[rank] {
        return Err(ClusterError::Corrupt {
            path,
            reason: "digest mismatch".into(),
        });
    }
    let shard = decode_payload(&bytes, rank).map_err(|reason| ClusterError::Corrupt {
        path: path.clone(),
        reason,
    })?;
    if shard.kind() != metadata.representation_kind {
        return Err(ClusterError::Corrupt {
            path,
            reason: "payload kind differs from metadata".into(),
        });
    }
    Ok(shard)
}

/// Complete metadata plus every rank payload present with the recorded
/// digest.
pub fn verify_generation(dir: &Path) -> ClusterResult<CheckpointMetadata> {
    let metadata = read_metadata(dir)?;
    for (rank, digest) in metadata.rank_digests.iter().enumerate() {
        let path = rank_file(dir, rank);
        let bytes = fs::read(&path).map_err(|e| ClusterError::io(&path, e))?;
        if &digest_hex(&bytes) != digest {
            return Err(ClusterError::Corrupt {
                path,
                reason: "digest mismatch".into(),
            });
        }
    }
    Ok(metadata)
}

/// Generations under `root`, oldest first. A missing root is empty.
pub fn list_generations(root: &Path) -> ClusterResult<Vec<Generation>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ClusterError::io(root, e)),
    };
    let mut generations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ClusterError::io(root, e))?;
        let path = entry.path();
        let step = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("gen-"))
            .and_then(|s| s.parse::<u64>().ok());
        if let (Some(step), true) = (step, path.is_dir()) {
            generations.push(Generation {
                step,
                complete: path.join(METADATA_FILE).is_file(),
                path,
            });
        }
    }
    generations.sort_by_key(|g| g.step);
    Ok(generations)
}

/// Newest generation that every rank can restore from.
pub fn latest_consistent_generation(root: &Path) -> ClusterResult<Option<Generation>> {
    for generation in list_generations(root)?.into_iter().rev() {
        if !generation.complete {
            debug!(step = generation.step, "skipping incomplete generation");
            continue;
        }
        match verify_generation(&generation.path) {
            Ok(_) => return Ok(Some(generation)),
            Err(err) => warn!(step = generation.step, error = %err, "skipping inconsistent generation"),
        }
    }
    Ok(None)
}

pub fn delete_generation(dir: &Path) -> ClusterResult<()> {
    fs::remove_dir_all(dir).map_err(|e| ClusterError::io(dir, e))?;
    debug!(dir = %dir.display(), "generation deleted");
    Ok(())
}

/// Keep the newest `keep` complete generations. Older generations, and
/// incomplete ones older than the newest complete one, are removed.
/// Returns the removed steps.
pub fn prune_generations(root: &Path, keep: usize) -> ClusterResult<Vec<u64>> {
    let generations = list_generations(root)?;
    let complete: Vec<&Generation> = generations.iter().filter(|g| g.complete).collect();
    let Some(newest) = complete.last().map(|g| g.step) else {
        return Ok(Vec::new());
    };
    let cutoff = complete
        .len()
        .checked_sub(keep)
        .and_then(|i| complete.get(i))
        .map_or(0, |g| g.step);

    let mut removed = Vec::new();
    for g in &generations {
        let stale_complete = g.complete && g.step < cutoff;
        let stale_partial = !g.complete && g.step < newest;
        if stale_complete || stale_partial {
            delete_generation(&g.path)?;
            removed.push(g.step);
        }
    }
    Ok(removed)
}

fn encode_payload(rank: usize, shard: &Shard) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(rank as u32).to_le_bytes());
    match shard {
        Shard::Dense(amps) => {
            out.push(0);
            out.extend_from_slice(&(amps.len() as u64).to_le_bytes());
            push_complex(&mut out, amps);
        }
        Shard::Mps(sites) => {
            out.push(1);
            out.extend_from_slice(&(sites.len() as u64).to_le_bytes());
            for s in sites {
                for d in [s.dl, s.dp, s.dr] {
                    out.extend_from_slice(&(d as u64).to_le_bytes());
                }
                push_complex(&mut out, &s.data);
            }
        }
    }
    out
}

fn push_complex(out: &mut Vec<u8>, values: &[C64]) {
    for z in values {
        out.extend_from_slice(&z.re.to_le_bytes());
        out.extend_from_slice(&z.im.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        let end = end.ok_or_else(|| format!("payload truncated at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn size(&mut self) -> Result<usize, String> {
        usize::try_from(u64::from_le_bytes(self.array()?)).map_err(|e| e.to_string())
    }

    fn complex(&mut self, count: usize) -> Result<Vec<C64>, String> {
        let bytes = count
            .checked_mul(16)
            .ok_or_else(|| "element count overflows".to_string())?;
        let raw = self.take(bytes)?;
        Ok(raw
            .chunks_exact(16)
            .map(|c| {
                let mut re = [0u8; 8];
                let mut im = [0u8; 8];
                re.copy_from_slice(&c[..8]);
                im.copy_from_slice(&c[8..]);
                C64::new(f64::from_le_bytes(re), f64::from_le_bytes(im))
            })
            .collect())
    }
}

fn decode_payload(bytes: &[u8], rank: usize) -> Result<Shard, String> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(4)? != MAGIC {
        return Err("bad magic".into());
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(format!("unsupported payload version {}", version));
    }
    let stored_rank = r.u32()? as usize;
    if stored_rank != rank {
        return Err(format!("payload belongs to rank {}", stored_rank));
    }
    let kind = r.take(1)?[0];
    let shard = match kind {
        0 => {
            let count = r.size()?;
            Shard::Dense(r.complex(count)?)
        }
        1 => {
            let count = r.size()?;
            let mut sites = Vec::new();
            for _ in 0..count {
                let (dl, dp, dr) = (r.size()?, r.size()?, r.size()?);
                let len = dl
                    .checked_mul(dp)
                    .and_then(|x| x.checked_mul(dr))
                    .ok_or_else(|| "site dimensions overflow".to_string())?;
                sites.push(Tensor3 {
                    data: r.complex(len)?,
                    dl,
                    dp,
                    dr,
                });
            }
            Shard::Mps(sites)
        }
        other => return Err(format!("unknown payload kind {}", other)),
    };
    if r.pos != bytes.len() {
        return Err(format!("{} trailing bytes", bytes.len() - r.pos));
    }
    Ok(shard)
}
