use backend::{ComputeBackend, DenseTensor, SvdFactors};
use num_complex::Complex64;
use tracing::debug;

use crate::env::{left_env, site_density};
use crate::error::{TnError, TnResult};
use crate::truncation::{BudgetConfig, Truncation, TruncationBudget};

pub type C64 = Complex64;

/// Site tensor with index order (left bond, physical, right bond).
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor3 {
    pub data: Vec<C64>,
    pub dl: usize,
    pub dp: usize,
    pub dr: usize,
}

impl Tensor3 {
    pub fn zeros(dl: usize, dp: usize, dr: usize) -> Self {
        Self {
            data: vec![C64::new(0.0, 0.0); dl * dp * dr],
            dl,
            dp,
            dr,
        }
    }

    #[inline]
    fn idx(&self, l: usize, p: usize, r: usize) -> usize {
        (l * self.dp + p) * self.dr + r
    }

    pub fn get(&self, l: usize, p: usize, r: usize) -> C64 {
        self.data[self.idx(l, p, r)]
    }

    pub fn set(&mut self, l: usize, p: usize, r: usize, v: C64) {
        let i = self.idx(l, p, r);
        self.data[i] = v;
    }

    pub fn norm_sqr(&self) -> f64 {
        self.data.iter().map(|z| z.norm_sqr()).sum()
    }

    pub fn to_tensor(&self) -> TnResult<DenseTensor> {
        Ok(DenseTensor::new(
            vec![self.dl, self.dp, self.dr],
            self.data.clone(),
        )?)
    }

    pub fn from_tensor(t: DenseTensor) -> TnResult<Self> {
        let shape = t.shape().to_vec();
        if shape.len() != 3 {
            return Err(TnError::Inconsistent(format!(
                "site tensor must have rank 3, got shape {:?}",
                shape
            )));
        }
        Ok(Self {
            data: t.into_data(),
            dl: shape[0],
            dp: shape[1],
            dr: shape[2],
        })
    }

    /// Contract a single-site operator `op[p][pp]` into the physical index.
    fn with_operator(&self, op: &[[C64; 2]; 2]) -> Self {
        let mut out = Tensor3::zeros(self.dl, self.dp, self.dr);
        for l in 0..self.dl {
            for r in 0..self.dr {
                for p in 0..2 {
                    let mut acc = C64::new(0.0, 0.0);
                    for pp in 0..2 {
                        acc += op[p][pp] * self.get(l, pp, r);
                    }
                    out.set(l, p, r, acc);
                }
            }
        }
        out
    }
}

/// Open-boundary MPS kept in mixed-canonical form around `center`: sites
/// left of the centre are left-isometries, sites right of it are
/// right-isometries.
#[derive(Clone, Debug)]
pub struct Mps {
    sites: Vec<Tensor3>,
    center: usize,
    trunc: Truncation,
    budget: TruncationBudget,
}

impl Mps {
    /// Product state `|0...0>`.
    pub fn new_zero(n: usize, trunc: Truncation, budget: BudgetConfig) -> Self {
        let mut sites = Vec::with_capacity(n);
        for _ in 0..n {
            let mut t = Tensor3::zeros(1, 2, 1);
            t.set(0, 0, 0, C64::new(1.0, 0.0));
            sites.push(t);
        }
        Self {
            sites,
            center: 0,
            trunc,
            budget: TruncationBudget::new(budget),
        }
    }

    /// Reassemble a chain (or a contiguous window of one) from its parts.
    pub fn from_parts(
        sites: Vec<Tensor3>,
        center: usize,
        trunc: Truncation,
        budget: TruncationBudget,
    ) -> TnResult<Self> {
        if sites.is_empty() {
            return Err(TnError::Inconsistent("chain has no sites".into()));
        }
        if center >= sites.len() {
            return Err(TnError::SiteOutOfRange {
                site: center,
                len: sites.len(),
            });
        }
        for (i, pair) in sites.windows(2).enumerate() {
            if pair[0].dr != pair[1].dl {
                return Err(TnError::Inconsistent(format!(
                    "bond {} has dims {} and {}",
                    i, pair[0].dr, pair[1].dl
                )));
            }
        }
        if let Some(i) = sites.iter().position(|s| s.dp != 2) {
            return Err(TnError::Inconsistent(format!(
                "site {} has physical dimension {}",
                i, sites[i].dp
            )));
        }
        Ok(Self {
            sites,
            center,
            trunc,
            budget,
        })
    }

    pub fn into_parts(self) -> (Vec<Tensor3>, usize, TruncationBudget) {
        (self.sites, self.center, self.budget)
    }

    /// Compress a big-endian dense amplitude vector by sequential SVDs.
    pub fn from_dense(
        backend: &dyn ComputeBackend,
        amplitudes: &[C64],
        trunc: Truncation,
        budget: BudgetConfig,
    ) -> TnResult<Self> {
        let len = amplitudes.len();
        if len < 2 || !len.is_power_of_two() {
            return Err(TnError::Inconsistent(format!(
                "amplitude vector of length {} is not a qubit register",
                len
            )));
        }
        let n = len.trailing_zeros() as usize;
        let mut budget = TruncationBudget::new(budget);
        let mut sites = Vec::with_capacity(n);
        let mut rest = DenseTensor::new(vec![1, 2, len / 2], amplitudes.to_vec())?;

        for _ in 0..n - 1 {
            let f = backend.svd(&rest, &[0, 1], trunc.max_bond, trunc.cutoff)?;
            budget.record(f.relative_error())?;
            let tail = rest.shape()[2] / 2;
            let kept = f.rank();
            let SvdFactors { u, vh, s, .. } = renormalized(f);
            sites.push(Tensor3::from_tensor(u)?);
            rest = scale_rows(vh, &s).reshape(vec![kept, 2, tail])?;
        }
        let last = rest.shape()[0];
        sites.push(Tensor3::from_tensor(rest.reshape(vec![last, 2, 1])?)?);

        Ok(Self {
            sites,
            center: n - 1,
            trunc,
            budget,
        })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn sites(&self) -> &[Tensor3] {
        &self.sites
    }

    pub fn center(&self) -> usize {
        self.center
    }

    pub fn truncation(&self) -> Truncation {
        self.trunc
    }

    /// Raise or lower the bond cap for later truncations.
    pub fn set_max_bond(&mut self, max_bond: usize) {
        self.trunc.max_bond = max_bond;
    }

    pub fn budget(&self) -> &TruncationBudget {
        &self.budget
    }

    pub fn truncation_error(&self) -> f64 {
        self.budget.accumulated()
    }

    /// Dimensions of the `n - 1` internal bonds.
    pub fn bond_dims(&self) -> Vec<usize> {
        self.sites[..self.sites.len().saturating_sub(1)]
            .iter()
            .map(|s| s.dr)
            .collect()
    }

    pub fn max_bond_dim(&self) -> usize {
        self.sites.iter().map(|s| s.dl.max(s.dr)).max().unwrap_or(1)
    }

    fn check_site(&self, site: usize) -> TnResult<()> {
        if site >= self.sites.len() {
            return Err(TnError::SiteOutOfRange {
                site,
                len: self.sites.len(),
            });
        }
        Ok(())
    }

    /// Apply a single-qubit unitary. Unitaries preserve both isometry
    /// conditions, so the centre stays where it is.
    pub fn apply_1q(&mut self, k: usize, u: &[[C64; 2]; 2]) -> TnResult<()> {
        self.check_site(k)?;
        self.sites[k] = self.sites[k].with_operator(u);
        Ok(())
    }

    /// Move the orthogonality centre to site `k`.
    pub fn move_center(&mut self, backend: &dyn ComputeBackend, k: usize) -> TnResult<()> {
        self.check_site(k)?;
        while self.center < k {
            self.shift_center_right(backend)?;
        }
        while self.center > k {
            self.shift_center_left(backend)?;
        }
        Ok(())
    }

    /// Bring the whole chain into right-canonical form (centre at site 0).
    pub fn canonicalize(&mut self, backend: &dyn ComputeBackend) -> TnResult<()> {
        self.move_center(backend, 0)
    }

    fn shift_center_right(&mut self, backend: &dyn ComputeBackend) -> TnResult<()> {
        let c = self.center;
        let f = backend.svd(&self.sites[c].to_tensor()?, &[0, 1], usize::MAX, 0.0)?;
        let SvdFactors { u, s, vh, .. } = f;
        let carry = scale_rows(vh, &s);
        let next = backend.contract(&carry, &self.sites[c + 1].to_tensor()?, &[1], &[0])?;
        self.sites[c] = Tensor3::from_tensor(u)?;
        self.sites[c + 1] = Tensor3::from_tensor(next)?;
        self.center = c + 1;
        Ok(())
    }

    fn shift_center_left(&mut self, backend: &dyn ComputeBackend) -> TnResult<()> {
        let c = self.center;
        let f = backend.svd(&self.sites[c].to_tensor()?, &[0], usize::MAX, 0.0)?;
        let SvdFactors { u, s, vh, .. } = f;
        let carry = scale_cols(u, &s);
        let prev = backend.contract(&self.sites[c - 1].to_tensor()?, &carry, &[2], &[0])?;
        self.sites[c] = Tensor3::from_tensor(vh)?;
        self.sites[c - 1] = Tensor3::from_tensor(prev)?;
        self.center = c - 1;
        Ok(())
    }

    /// Apply a two-qubit gate to sites `(k, k + 1)`; row index of `u` is
    /// `p_k * 2 + p_{k+1}`. Returns the relative weight discarded.
    pub fn apply_2q_adjacent(
        &mut self,
        backend: &dyn ComputeBackend,
        k: usize,
        u: &[[C64; 4]; 4],
    ) -> TnResult<f64> {
        self.check_site(k + 1)?;
        if self.center < k {
            self.move_center(backend, k)?;
        } else if self.center > k + 1 {
            self.move_center(backend, k + 1)?;
        }

        let a = self.sites[k].to_tensor()?;
        let b = self.sites[k + 1].to_tensor()?;
        let theta = backend.contract(&a, &b, &[2], &[0])?;
        let (dl, dr) = (theta.shape()[0], theta.shape()[3]);

        let mut gated = DenseTensor::zeros(vec![dl, 2, 2, dr]);
        {
            let src = theta.data();
            let dst = gated.data_mut();
            for l in 0..dl {
                for r in 0..dr {
                    for i in 0..4 {
                        let mut acc = C64::new(0.0, 0.0);
                        for (j, g) in u[i].iter().enumerate() {
                            acc += g * src[((l * 2 + j / 2) * 2 + j % 2) * dr + r];
                        }
                        dst[((l * 2 + i / 2) * 2 + i % 2) * dr + r] = acc;
                    }
                }
            }
        }

        let f = backend.svd(&gated, &[0, 1], self.trunc.max_bond, self.trunc.cutoff)?;
        let discarded = f.relative_error();
        self.budget.record(discarded)?;

        let SvdFactors { u: left, s, vh, .. } = renormalized(f);
        self.sites[k] = Tensor3::from_tensor(left)?;
        self.sites[k + 1] = Tensor3::from_tensor(scale_rows(vh, &s))?;
        self.center = k + 1;

        debug!(site = k, bond = s.len(), discarded, "two-site update");
        Ok(discarded)
    }

    /// Apply a two-qubit gate to arbitrary sites `(a, b)`; `a` indexes the
    /// high bit of the gate matrix. Non-adjacent targets are routed through
    /// a SWAP network and swapped back afterwards, so the cost grows with
    /// `|a - b|`.
    pub fn apply_2q(
        &mut self,
        backend: &dyn ComputeBackend,
        a: usize,
        b: usize,
        u: &[[C64; 4]; 4],
    ) -> TnResult<f64> {
        self.check_site(a)?;
        self.check_site(b)?;
        if a == b {
            return Err(TnError::RepeatedSite(a));
        }
        let (lo, hi, gate) = if a < b { (a, b, *u) } else { (b, a, swap_qubit_order(u)) };

        if hi == lo + 1 {
            return self.apply_2q_adjacent(backend, lo, &gate);
        }

        self.move_center(backend, lo)?;
        let swap = swap_gate();
        let mut discarded = 0.0;
        for k in lo..hi - 1 {
            discarded += self.apply_2q_adjacent(backend, k, &swap)?;
        }
        discarded += self.apply_2q_adjacent(backend, hi - 1, &gate)?;
        for k in (lo..hi - 1).rev() {
            discarded += self.apply_2q_adjacent(backend, k, &swap)?;
        }
        debug!(lo, hi, swaps = 2 * (hi - lo - 1), "non-local gate via swap network");
        Ok(discarded)
    }

    /// `<psi|psi>` by full contraction.
    pub fn norm_sqr(&self) -> f64 {
        left_env(&self.sites, self.sites.len())
            .first()
            .map_or(0.0, |z| z.re)
    }

    /// Dense big-endian amplitudes. Caller is responsible for size limits.
    pub fn to_dense(&self) -> Vec<C64> {
        let mut cur = vec![C64::new(1.0, 0.0); self.sites[0].dl];
        let mut bond = self.sites[0].dl;
        let mut prefix = 1usize;
        for s in &self.sites {
            let mut next = vec![C64::new(0.0, 0.0); prefix * 2 * s.dr];
            for idx in 0..prefix {
                for l in 0..bond {
                    let c = cur[idx * bond + l];
                    if c == C64::new(0.0, 0.0) {
                        continue;
                    }
                    for p in 0..2 {
                        for r in 0..s.dr {
                            next[(idx * 2 + p) * s.dr + r] += c * s.get(l, p, r);
                        }
                    }
                }
            }
            cur = next;
            prefix *= 2;
            bond = s.dr;
        }
        cur
    }

    /// Schmidt coefficients across the bond between sites `bond` and
    /// `bond + 1`, in non-increasing order.
    pub fn schmidt_values(&mut self, backend: &dyn ComputeBackend, bond: usize) -> TnResult<Vec<f64>> {
        self.check_site(bond + 1)?;
        self.move_center(backend, bond)?;
        let f = backend.svd(&self.sites[bond].to_tensor()?, &[0, 1], usize::MAX, 0.0)?;
        Ok(f.s)
    }

    /// Von Neumann entropy (bits) of sites `0..=bond` against the rest.
    pub fn bond_entropy(&mut self, backend: &dyn ComputeBackend, bond: usize) -> TnResult<f64> {
        let s = self.schmidt_values(backend, bond)?;
        let total: f64 = s.iter().map(|x| x * x).sum();
        let mut h = 0.0;
        for x in s {
            let p = x * x / total;
            if p > 1e-300 {
                h -= p * p.log2();
            }
        }
        Ok(h)
    }

    /// Weights `||K_i psi||^2` of candidate single-site operators at `k`.
    pub fn operator_weights(
        &mut self,
        backend: &dyn ComputeBackend,
        k: usize,
        ops: &[[[C64; 2]; 2]],
    ) -> TnResult<Vec<f64>> {
        self.move_center(backend, k)?;
        Ok(ops
            .iter()
            .map(|op| self.sites[k].with_operator(op).norm_sqr())
            .collect())
    }

    /// Apply a (not necessarily unitary) operator at `k` and rescale the
    /// state by `1 / sqrt(weight)`. The centre must already sit at `k`,
    /// which `operator_weights` guarantees.
    pub fn apply_1q_normalized(&mut self, k: usize, op: &[[C64; 2]; 2], weight: f64) -> TnResult<()> {
        self.check_site(k)?;
        if self.center != k {
            return Err(TnError::Inconsistent(format!(
                "non-unitary update at site {} needs the centre there (centre is {})",
                k, self.center
            )));
        }
        let scale = if weight > 0.0 { 1.0 / weight.sqrt() } else { 0.0 };
        let mut t = self.sites[k].with_operator(op);
        for z in t.data.iter_mut() {
            *z *= scale;
        }
        self.sites[k] = t;
        Ok(())
    }

    /// Normalised reduced density matrix of site `k`.
    pub fn site_density(&self, k: usize) -> TnResult<[[C64; 2]; 2]> {
        self.check_site(k)?;
        let mut rho = site_density(&self.sites, k);
        let trace = (rho[0][0] + rho[1][1]).re;
        if trace > 0.0 {
            for row in rho.iter_mut() {
                for z in row.iter_mut() {
                    *z /= trace;
                }
            }
        }
        Ok(rho)
    }
}

/// Rescale kept singular values so the factorisation keeps the full norm.
fn renormalized(mut f: SvdFactors) -> SvdFactors {
    let kept = f.total_weight - f.truncation_error;
    if f.truncation_error > 0.0 && kept > 0.0 {
        let scale = (f.total_weight / kept).sqrt();
        for x in f.s.iter_mut() {
            *x *= scale;
        }
    }
    f
}

/// `diag(s) * t`, scaling along the first axis.
fn scale_rows(mut t: DenseTensor, s: &[f64]) -> DenseTensor {
    let stride = t.len() / s.len().max(1);
    for (i, chunk) in t.data_mut().chunks_mut(stride.max(1)).enumerate() {
        for z in chunk.iter_mut() {
            *z *= s[i];
        }
    }
    t
}

/// `t * diag(s)`, scaling along the last axis.
fn scale_cols(mut t: DenseTensor, s: &[f64]) -> DenseTensor {
    let k = s.len();
    for (i, z) in t.data_mut().iter_mut().enumerate() {
        *z *= s[i % k];
    }
    t
}

pub fn swap_gate() -> [[C64; 4]; 4] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    [
        [o, z, z, z],
        [z, z, o, z],
        [z, o, z, z],
        [z, z, z, o],
    ]
}

/// Reinterpret a two-qubit matrix with its qubit order reversed.
pub fn swap_qubit_order(u: &[[C64; 4]; 4]) -> [[C64; 4]; 4] {
    let flip = |i: usize| (i % 2) * 2 + i / 2;
    let mut out = [[C64::new(0.0, 0.0); 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = u[flip(i)][flip(j)];
        }
    }
    out
}
