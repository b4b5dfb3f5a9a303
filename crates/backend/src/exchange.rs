//! Loopback collective transport.
//!
//! Buffers are indexed by global rank. Every pattern copies payloads into
//! the receivers' buffers; no rank ever aliases another rank's memory.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::tensor::C64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangePattern {
    /// Rank `r` receives the buffer of `partners[r]`. Must be an involution;
    /// a rank paired with itself keeps its own data.
    Pairwise { partners: Vec<usize> },
    /// `root` receives the concatenation of the listed ranks' buffers, in
    /// the listed order.
    Gather { root: usize, ranks: Vec<usize> },
    /// The buffer of `root` is split by `counts` and delivered to `ranks`.
    Scatter {
        root: usize,
        ranks: Vec<usize>,
        counts: Vec<usize>,
    },
    /// Every rank receives a copy of the buffer of `root`.
    Broadcast { root: usize },
    /// Each rank's buffer is cut into `world_size` equal chunks; chunk `s`
    /// of rank `r` lands as chunk `r` of rank `s`.
    AllToAll,
}

impl ExchangePattern {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pairwise { .. } => "pairwise",
            Self::Gather { .. } => "gather",
            Self::Scatter { .. } => "scatter",
            Self::Broadcast { .. } => "broadcast",
            Self::AllToAll => "all-to-all",
        }
    }

    /// Ranks that take part in the exchange.
    pub fn participants(&self, world_size: usize) -> BTreeSet<usize> {
        match self {
            Self::Pairwise { partners } => partners
                .iter()
                .enumerate()
                .filter(|(r, p)| *r != **p)
                .map(|(r, _)| r)
                .collect(),
            Self::Gather { root, ranks } | Self::Scatter { root, ranks, .. } => {
                let mut set: BTreeSet<usize> = ranks.iter().copied().collect();
                set.insert(*root);
                set
            }
            Self::Broadcast { .. } | Self::AllToAll => (0..world_size).collect(),
        }
    }
}

/// Deliver `send` into `recv` following `pattern`.
pub fn route(
    send: &[Vec<C64>],
    recv: &mut [Vec<C64>],
    pattern: &ExchangePattern,
    unreachable: &BTreeSet<usize>,
) -> BackendResult<()> {
    let world = send.len();
    if recv.len() != world {
        return Err(BackendError::Pattern(format!(
            "{} send buffers but {} receive buffers",
            world,
            recv.len()
        )));
    }

    let participants = pattern.participants(world);
    if let Some(&rank) = participants.iter().find(|r| **r >= world) {
        return Err(BackendError::Pattern(format!(
            "rank {} outside world of size {}",
            rank, world
        )));
    }
    if let Some(&rank) = participants.intersection(unreachable).next() {
        return Err(BackendError::CommunicationFailure {
            rank,
            operation: pattern.name(),
        });
    }

    match pattern {
        ExchangePattern::Pairwise { partners } => {
            if partners.len() != world {
                return Err(BackendError::Pattern(format!(
                    "pairwise map has {} entries for {} ranks",
                    partners.len(),
                    world
                )));
            }
            for (r, &p) in partners.iter().enumerate() {
                if p >= world || partners[p] != r {
                    return Err(BackendError::Pattern(format!(
                        "pairwise map is not an involution at rank {}",
                        r
                    )));
                }
            }
            for (r, &p) in partners.iter().enumerate() {
                recv[r] = send[p].clone();
            }
        }
        ExchangePattern::Gather { root, ranks } => {
            let mut gathered = Vec::with_capacity(ranks.iter().map(|&r| send[r].len()).sum());
            for &r in ranks {
                gathered.extend_from_slice(&send[r]);
            }
            for &r in ranks {
                recv[r].clear();
            }
            recv[*root] = gathered;
        }
        ExchangePattern::Scatter { root, ranks, counts } => {
            if ranks.len() != counts.len() {
                return Err(BackendError::Pattern(format!(
                    "{} scatter targets but {} counts",
                    ranks.len(),
                    counts.len()
                )));
            }
            let total: usize = counts.iter().sum();
            let source = &send[*root];
            if total != source.len() {
                return Err(BackendError::Pattern(format!(
                    "scatter counts sum to {} but root holds {} elements",
                    total,
                    source.len()
                )));
            }
            let mut pieces = Vec::with_capacity(ranks.len());
            let mut offset = 0;
            for &count in counts {
                pieces.push(source[offset..offset + count].to_vec());
                offset += count;
            }
            for (&r, piece) in ranks.iter().zip(pieces) {
                recv[r] = piece;
            }
        }
        ExchangePattern::Broadcast { root } => {
            let source = send[*root].clone();
            for buf in recv.iter_mut() {
                *buf = source.clone();
            }
        }
        ExchangePattern::AllToAll => {
            let len = send.first().map_or(0, Vec::len);
            if send.iter().any(|b| b.len() != len) || len % world != 0 {
                return Err(BackendError::Pattern(format!(
                    "all-to-all needs equal buffers divisible by {}",
                    world
                )));
            }
            let chunk = len / world;
            for (r, out) in recv.iter_mut().enumerate() {
                let mut next = Vec::with_capacity(len);
                for buf in send {
                    next.extend_from_slice(&buf[r * chunk..(r + 1) * chunk]);
                }
                *out = next;
            }
        }
    }

    debug!(
        pattern = pattern.name(),
        participants = participants.len(),
        "collective exchange complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bufs(values: &[&[f64]]) -> Vec<Vec<C64>> {
        values
            .iter()
            .map(|v| v.iter().map(|&x| C64::new(x, 0.0)).collect())
            .collect()
    }

    #[test]
    fn pairwise_swaps_partners() {
        let send = bufs(&[&[0.0], &[1.0], &[2.0], &[3.0]]);
        let mut recv = vec![Vec::new(); 4];
        let pattern = ExchangePattern::Pairwise { partners: vec![1, 0, 3, 2] };
        route(&send, &mut recv, &pattern, &BTreeSet::new()).unwrap();
        assert_eq!(recv, bufs(&[&[1.0], &[0.0], &[3.0], &[2.0]]));
    }

    #[test]
    fn pairwise_rejects_non_involution() {
        let send = bufs(&[&[0.0], &[1.0], &[2.0]]);
        let mut recv = vec![Vec::new(); 3];
        let pattern = ExchangePattern::Pairwise { partners: vec![1, 2, 0] };
        assert!(route(&send, &mut recv, &pattern, &BTreeSet::new()).is_err());
    }

    #[test]
    fn gather_then_scatter_restores_buffers() {
        let send = bufs(&[&[0.0, 1.0], &[2.0], &[3.0, 4.0, 5.0]]);
        let mut recv = vec![Vec::new(); 3];
        let gather = ExchangePattern::Gather { root: 0, ranks: vec![0, 1, 2] };
        route(&send, &mut recv, &gather, &BTreeSet::new()).unwrap();
        assert_eq!(recv[0].len(), 6);

        let mut back = vec![Vec::new(); 3];
        let scatter = ExchangePattern::Scatter {
            root: 0,
            ranks: vec![0, 1, 2],
            counts: vec![2, 1, 3],
        };
        route(&recv, &mut back, &scatter, &BTreeSet::new()).unwrap();
        assert_eq!(back, send);
    }

    #[test]
    fn all_to_all_transposes_chunks() {
        let send = bufs(&[&[0.0, 1.0], &[10.0, 11.0]]);
        let mut recv = vec![Vec::new(); 2];
        route(&send, &mut recv, &ExchangePattern::AllToAll, &BTreeSet::new()).unwrap();
        assert_eq!(recv, bufs(&[&[0.0, 10.0], &[1.0, 11.0]]));
    }

    #[test]
    fn unreachable_participant_fails() {
        let send = bufs(&[&[0.0], &[1.0]]);
        let mut recv = vec![Vec::new(); 2];
        let down: BTreeSet<usize> = [1].into_iter().collect();
        let err = route(&send, &mut recv, &ExchangePattern::Broadcast { root: 0 }, &down);
        assert!(matches!(
            err,
            Err(BackendError::CommunicationFailure { rank: 1, .. })
        ));
    }
}
