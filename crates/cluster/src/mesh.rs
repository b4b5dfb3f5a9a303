use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use backend::{select_backend, ComputeBackend};
use rng::{rank_seed, ONDRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClusterError, ClusterResult};

/// N-dimensional grid of ranks, row-major. The total rank count must be a
/// power of two so ranks can own whole qubit-index blocks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct MeshShape(Vec<usize>);

impl MeshShape {
    pub fn new(dims: Vec<usize>) -> ClusterResult<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(ClusterError::Validation(format!(
                "mesh shape {:?} must have positive extents",
                dims
            )));
        }
        let world = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| ClusterError::Validation(format!("mesh shape {:?} overflows", dims)))?;
        if !world.is_power_of_two() {
            return Err(ClusterError::Validation(format!(
                "mesh shape {:?} has {} ranks, not a power of two",
                dims, world
            )));
        }
        Ok(Self(dims))
    }

    pub fn single() -> Self {
        Self(vec![1])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn world_size(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major coordinates of `rank`.
    pub fn coords(&self, rank: usize) -> Vec<usize> {
        let mut rest = rank;
        let mut coords = vec![0; self.0.len()];
        for (c, &d) in coords.iter_mut().zip(&self.0).rev() {
            *c = rest % d;
            rest /= d;
        }
        coords
    }

    pub fn rank_of(&self, coords: &[usize]) -> Option<usize> {
        if coords.len() != self.0.len() || coords.iter().zip(&self.0).any(|(c, d)| c >= d) {
            return None;
        }
        Some(coords.iter().zip(&self.0).fold(0, |acc, (c, d)| acc * d + c))
    }
}

impl TryFrom<Vec<usize>> for MeshShape {
    type Error = ClusterError;

    fn try_from(dims: Vec<usize>) -> ClusterResult<Self> {
        Self::new(dims)
    }
}

impl From<MeshShape> for Vec<usize> {
    fn from(mesh: MeshShape) -> Self {
        mesh.0
    }
}

/// Parses `"2x4"` or `"2,4"`.
impl FromStr for MeshShape {
    type Err = ClusterError;

    fn from_str(s: &str) -> ClusterResult<Self> {
        let dims = s
            .split(|c| c == 'x' || c == ',')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .map_err(|_| ClusterError::Validation(format!("bad mesh extent '{}' in '{}'", part, s)))
            })
            .collect::<ClusterResult<Vec<_>>>()?;
        Self::new(dims)
    }
}

impl fmt::Display for MeshShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankInfo {
    pub global_rank: usize,
    pub coords: Vec<usize>,
    /// `hash(global_seed, global_rank)`
    pub seed: u64,
}

/// Rank topology and backend for one job. Immutable once built.
#[derive(Clone, Debug)]
pub struct Context {
    mesh: MeshShape,
    global_seed: u64,
    global_rank: usize,
    ranks: Vec<RankInfo>,
    backend: Arc<dyn ComputeBackend>,
}

impl Context {
    pub fn mesh(&self) -> &MeshShape {
        &self.mesh
    }

    pub fn global_seed(&self) -> u64 {
        self.global_seed
    }

    /// Rank driving this process; it writes checkpoint metadata.
    pub fn global_rank(&self) -> usize {
        self.global_rank
    }

    pub fn world_size(&self) -> usize {
        self.ranks.len()
    }

    pub fn ranks(&self) -> &[RankInfo] {
        &self.ranks
    }

    pub fn rank(&self, rank: usize) -> Option<&RankInfo> {
        self.ranks.get(rank)
    }

    /// Fresh generator for `rank`, seeded from the rank's derived seed.
    pub fn rank_rng(&self, rank: usize) -> Option<ONDRng> {
        self.rank(rank).map(|r| ONDRng::from_seed(r.seed))
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }
}

/// Build a context on the default CPU backend.
pub fn init_cluster(mesh: MeshShape, seed: u64) -> ClusterResult<Context> {
    init_cluster_with_backend(mesh, seed, select_backend("cpu")?)
}

pub fn init_cluster_with_backend(
    mesh: MeshShape,
    seed: u64,
    backend: Arc<dyn ComputeBackend>,
) -> ClusterResult<Context> {
    let ranks = (0..mesh.world_size())
        .map(|r| RankInfo {
            global_rank: r,
            coords: mesh.coords(r),
            seed: rank_seed(seed, r),
        })
        .collect();
    let device = backend.device_info();
    info!(
        mesh = %mesh,
        world_size = mesh.world_size(),
        backend = %device.backend_name,
        "cluster ready"
    );
    Ok(Context {
        mesh,
        global_seed: seed,
        global_rank: 0,
        ranks,
        backend,
    })
}
