//! Fixed partition functions.
//!
//! Dense states use a contiguous block partition of the amplitude index
//! space: with `W = 2^g` ranks and `n` qubits, global index `i` lives on
//! rank `i >> (n - g)` at local index `i & (2^(n-g) - 1)`. The inverse is
//! `(rank << (n - g)) | local`. Qubits `0..g` are therefore the split axes.
//!
//! MPS states use a contiguous block partition over sites: the first
//! `n % W` ranks own `n / W + 1` sites, the rest own `n / W`.

use std::ops::Range;

use crate::error::{ClusterError, ClusterResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPartition {
    num_qubits: usize,
    global_bits: usize,
}

impl BlockPartition {
    pub fn new(num_qubits: usize, world_size: usize) -> ClusterResult<Self> {
        if !world_size.is_power_of_two() {
            return Err(ClusterError::Validation(format!(
                "world size {} is not a power of two",
                world_size
            )));
        }
        let global_bits = world_size.trailing_zeros() as usize;
        if global_bits >= num_qubits {
            return Err(ClusterError::Validation(format!(
                "{} ranks leave no local qubits in a {} qubit register",
                world_size, num_qubits
            )));
        }
        Ok(Self {
            num_qubits,
            global_bits,
        })
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn world_size(&self) -> usize {
        1 << self.global_bits
    }

    /// Number of split-axis qubits.
    pub fn global_bits(&self) -> usize {
        self.global_bits
    }

    pub fn local_bits(&self) -> usize {
        self.num_qubits - self.global_bits
    }

    pub fn shard_len(&self) -> usize {
        1 << self.local_bits()
    }

    pub fn owner(&self, index: usize) -> usize {
        index >> self.local_bits()
    }

    pub fn local_index(&self, index: usize) -> usize {
        index & (self.shard_len() - 1)
    }

    pub fn global_index(&self, rank: usize, local: usize) -> usize {
        (rank << self.local_bits()) | local
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        let len = self.shard_len();
        rank * len..(rank + 1) * len
    }

    pub fn is_split_axis(&self, qubit: usize) -> bool {
        qubit < self.global_bits
    }

    /// Position of a local qubit inside a shard register.
    pub fn local_qubit(&self, qubit: usize) -> usize {
        qubit - self.global_bits
    }

    /// Mask selecting `qubit`'s bit in a rank index.
    pub fn rank_bit(&self, qubit: usize) -> usize {
        1 << (self.global_bits - 1 - qubit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SitePartition {
    ranges: Vec<Range<usize>>,
}

impl SitePartition {
    pub fn new(num_sites: usize, world_size: usize) -> ClusterResult<Self> {
        if world_size == 0 || world_size > num_sites {
            return Err(ClusterError::Validation(format!(
                "cannot spread {} sites over {} ranks",
                num_sites, world_size
            )));
        }
        let base = num_sites / world_size;
        let extra = num_sites % world_size;
        let mut start = 0;
        let ranges = (0..world_size)
            .map(|r| {
                let len = base + usize::from(r < extra);
                let range = start..start + len;
                start += len;
                range
            })
            .collect();
        Ok(Self { ranges })
    }

    pub fn world_size(&self) -> usize {
        self.ranges.len()
    }

    pub fn num_sites(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        self.ranges[rank].clone()
    }

    pub fn owner(&self, site: usize) -> usize {
        self.ranges.partition_point(|r| r.end <= site)
    }

    /// Ranks owning any site in `lo..=hi`.
    pub fn owners(&self, lo: usize, hi: usize) -> Range<usize> {
        self.owner(lo)..self.owner(hi) + 1
    }
}
