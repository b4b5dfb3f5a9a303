use std::collections::BTreeSet;
use std::sync::RwLock;

use faer::Mat;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::exchange::{route, ExchangePattern};
use crate::tensor::{check_distinct, DenseTensor, C64};
use crate::{ComputeBackend, DeviceInfo, SvdFactors};

const DEFAULT_MEMORY_BUDGET: u64 = 4 << 30;

/// Host CPU backend with an in-process loopback transport.
#[derive(Debug)]
pub struct CpuBackend {
    parallel: bool,
    memory_budget: u64,
    unreachable: RwLock<BTreeSet<usize>>,
}

impl CpuBackend {
    pub fn serial() -> Self {
        Self {
            parallel: false,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            unreachable: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn rayon() -> Self {
        Self {
            parallel: true,
            ..Self::serial()
        }
    }

    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Simulate a lost rank: every later exchange involving it fails.
    pub fn mark_unreachable(&self, rank: usize) {
        let mut set = self.unreachable.write().unwrap_or_else(|e| e.into_inner());
        warn!(rank, "rank marked unreachable");
        set.insert(rank);
    }

    pub fn mark_reachable(&self, rank: usize) {
        let mut set = self.unreachable.write().unwrap_or_else(|e| e.into_inner());
        set.remove(&rank);
    }

    fn matmul(&self, a: &[C64], b: &[C64], m: usize, k: usize, n: usize) -> Vec<C64> {
        let mut out = vec![C64::new(0.0, 0.0); m * n];
        if n == 0 {
            return out;
        }
        if self.parallel {
            out.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, row)| fill_row(a, b, k, i, row));
        } else {
            for (i, row) in out.chunks_mut(n).enumerate() {
                fill_row(a, b, k, i, row);
            }
        }
        out
    }
}

/// One output row of `a * b`; the reduction order is fixed.
fn fill_row(a: &[C64], b: &[C64], k: usize, i: usize, row: &mut [C64]) {
    let n = row.len();
    for (j, slot) in row.iter_mut().enumerate() {
        let mut acc = C64::new(0.0, 0.0);
        for x in 0..k {
            acc += a[i * k + x] * b[x * n + j];
        }
        *slot = acc;
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::serial()
    }
}

impl ComputeBackend for CpuBackend {
    fn contract(
        &self,
        a: &DenseTensor,
        b: &DenseTensor,
        axes_a: &[usize],
        axes_b: &[usize],
    ) -> BackendResult<DenseTensor> {
        if axes_a.len() != axes_b.len() {
            return Err(BackendError::InvalidAxes(format!(
                "{} axes on the left but {} on the right",
                axes_a.len(),
                axes_b.len()
            )));
        }
        check_distinct(axes_a, a.rank())?;
        check_distinct(axes_b, b.rank())?;
        for (&x, &y) in axes_a.iter().zip(axes_b) {
            if a.shape()[x] != b.shape()[y] {
                return Err(BackendError::Shape(format!(
                    "axis {} (dim {}) cannot contract with axis {} (dim {})",
                    x,
                    a.shape()[x],
                    y,
                    b.shape()[y]
                )));
            }
        }

        let free_a: Vec<usize> = (0..a.rank()).filter(|x| !axes_a.contains(x)).collect();
        let perm_a: Vec<usize> = free_a.iter().chain(axes_a).copied().collect();
        let ma = a.permute(&perm_a)?;
        let rows_dims: Vec<usize> = free_a.iter().map(|&x| a.shape()[x]).collect();
        let (mb, _, cols_dims) = b.matricize(axes_b)?;

        let m: usize = rows_dims.iter().product();
        let k: usize = axes_a.iter().map(|&x| a.shape()[x]).product();
        let n: usize = cols_dims.iter().product();

        let data = self.matmul(ma.data(), mb.data(), m, k, n);
        let shape: Vec<usize> = rows_dims.into_iter().chain(cols_dims).collect();
        DenseTensor::new(shape, data)
    }

    fn svd(
        &self,
        tensor: &DenseTensor,
        row_axes: &[usize],
        max_rank: usize,
        cutoff: f64,
    ) -> BackendResult<SvdFactors> {
        let (m, row_dims, col_dims) = tensor.matricize(row_axes)?;
        let rows = m.shape()[0];
        let cols = m.shape()[1];
        if rows == 0 || cols == 0 {
            return Err(BackendError::Shape("cannot decompose an empty matrix".into()));
        }

        let mut mat = Mat::<C64>::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                mat.write(r, c, m.data()[r * cols + c]);
            }
        }

        let svd = mat.thin_svd();
        let s = svd.s_diagonal();
        let u_full = svd.u();
        let v_full = svd.v();

        let mut order: Vec<(usize, f64)> = (0..s.nrows()).map(|i| (i, s.read(i).re)).collect();
        order.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));

        let mut kept = 0;
        for (i, &(_, sv)) in order.iter().enumerate() {
            if sv > cutoff && i < max_rank {
                kept += 1;
            }
        }
        if kept == 0 {
            kept = 1;
        }

        let total_weight: f64 = order.iter().map(|(_, sv)| sv * sv).sum();
        let truncation_error: f64 = order[kept..].iter().map(|(_, sv)| sv * sv).sum();

        let mut u_data = Vec::with_capacity(rows * kept);
        for r in 0..rows {
            for &(idx, _) in &order[..kept] {
                u_data.push(u_full.read(r, idx));
            }
        }
        let mut vh_data = Vec::with_capacity(kept * cols);
        for &(idx, _) in &order[..kept] {
            for c in 0..cols {
                vh_data.push(v_full.read(c, idx).conj());
            }
        }
        let s_vals: Vec<f64> = order[..kept].iter().map(|(_, sv)| *sv).collect();

        let u_shape: Vec<usize> = row_dims.into_iter().chain(std::iter::once(kept)).collect();
        let vh_shape: Vec<usize> = std::iter::once(kept).chain(col_dims).collect();

        debug!(rows, cols, kept, truncation_error, "svd");
        Ok(SvdFactors {
            u: DenseTensor::new(u_shape, u_data)?,
            s: s_vals,
            vh: DenseTensor::new(vh_shape, vh_data)?,
            truncation_error,
            total_weight,
        })
    }

    fn collective_exchange(
        &self,
        send: &[Vec<C64>],
        recv: &mut [Vec<C64>],
        pattern: &ExchangePattern,
    ) -> BackendResult<()> {
        let unreachable = self
            .unreachable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        route(send, recv, pattern, &unreachable)
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            backend_name: if self.parallel { "cpu-rayon" } else { "cpu" }.to_string(),
            device_id: 0,
            memory_budget: self.memory_budget,
        }
    }
}
