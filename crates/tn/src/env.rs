//! Transfer-matrix environments of `<psi|psi>`.
//!
//! These contract the chain without assuming any canonical form, so they
//! stay valid for chains built by hand or restored from checkpoints.

use crate::mps::{Tensor3, C64};

/// Contract sites `0..k` with their conjugates. Returns a `dr x dr` matrix
/// (row-major) over the right bond of site `k - 1`.
pub fn left_env(sites: &[Tensor3], k: usize) -> Vec<C64> {
    let mut env = vec![C64::new(1.0, 0.0)];
    for a in &sites[..k] {
        let mut next = vec![C64::new(0.0, 0.0); a.dr * a.dr];
        for l in 0..a.dl {
            for lp in 0..a.dl {
                let lval = env[l * a.dl + lp];
                if lval == C64::new(0.0, 0.0) {
                    continue;
                }
                for p in 0..a.dp {
                    for r in 0..a.dr {
                        let aval = lval * a.get(l, p, r);
                        for rp in 0..a.dr {
                            next[r * a.dr + rp] += aval * a.get(lp, p, rp).conj();
                        }
                    }
                }
            }
        }
        env = next;
    }
    env
}

/// Contract sites `k + 1..` with their conjugates. Returns a `dl x dl`
/// matrix over the left bond of site `k + 1`.
pub fn right_env(sites: &[Tensor3], k: usize) -> Vec<C64> {
    let mut env = vec![C64::new(1.0, 0.0)];
    for a in sites[k + 1..].iter().rev() {
        let mut next = vec![C64::new(0.0, 0.0); a.dl * a.dl];
        for r in 0..a.dr {
            for rp in 0..a.dr {
                let rval = env[r * a.dr + rp];
                if rval == C64::new(0.0, 0.0) {
                    continue;
                }
                for p in 0..a.dp {
                    for l in 0..a.dl {
                        let aval = a.get(l, p, r) * rval;
                        for lp in 0..a.dl {
                            next[l * a.dl + lp] += aval * a.get(lp, p, rp).conj();
                        }
                    }
                }
            }
        }
        env = next;
    }
    env
}

/// Unnormalised single-site reduced density matrix `rho[p][pp]` at site `k`.
pub fn site_density(sites: &[Tensor3], k: usize) -> [[C64; 2]; 2] {
    let s = &sites[k];
    let left = left_env(sites, k);
    let right = right_env(sites, k);

    let mut rho = [[C64::new(0.0, 0.0); 2]; 2];
    for (p, row) in rho.iter_mut().enumerate() {
        for (pp, slot) in row.iter_mut().enumerate() {
            let mut acc = C64::new(0.0, 0.0);
            for l in 0..s.dl {
                for lp in 0..s.dl {
                    let lval = left[l * s.dl + lp];
                    for r in 0..s.dr {
                        for rp in 0..s.dr {
                            let rval = right[r * s.dr + rp];
                            acc += lval * s.get(l, p, r) * s.get(lp, pp, rp).conj() * rval;
                        }
                    }
                }
            }
            *slot = acc;
        }
    }
    rho
}
