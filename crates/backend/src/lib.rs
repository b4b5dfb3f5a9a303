//! Compute backend contract consumed by the simulation engine.
//!
//! The engine never does dense linear algebra or inter-rank transport on its
//! own; it goes through a [`ComputeBackend`] chosen once when the cluster is
//! initialised. Two CPU strategies ship here:
//!
//! - `cpu`: serial contraction, faer SVD
//! - `cpu-rayon`: row-parallel contraction, same SVD
//!
//! Both are bit-reproducible: every output element is produced by one
//! sequential loop whatever the thread count.

pub mod cpu;
pub mod error;
pub mod exchange;
pub mod tensor;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use cpu::CpuBackend;
pub use error::{BackendError, BackendResult};
pub use exchange::ExchangePattern;
pub use tensor::{DenseTensor, C64};

/// Static description of the device behind a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub backend_name: String,
    pub device_id: usize,
    /// Bytes available for state storage.
    pub memory_budget: u64,
}

/// Result of a (possibly truncated) singular value decomposition.
///
/// `u` has shape `row_dims ++ [k]`, `vh` has shape `[k] ++ col_dims`, and
/// `s` holds the `k` kept singular values in non-increasing order.
#[derive(Debug, Clone)]
pub struct SvdFactors {
    pub u: DenseTensor,
    pub s: Vec<f64>,
    pub vh: DenseTensor,
    /// Sum of squares of the dropped singular values.
    pub truncation_error: f64,
    /// Sum of squares of all singular values.
    pub total_weight: f64,
}

impl SvdFactors {
    pub fn rank(&self) -> usize {
        self.s.len()
    }

    /// Discarded weight relative to the full weight of the input.
    pub fn relative_error(&self) -> f64 {
        if self.total_weight > 0.0 {
            self.truncation_error / self.total_weight
        } else {
            0.0
        }
    }
}

pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// Contract `a` and `b` over paired axes. The result carries the free
    /// axes of `a` (ascending) followed by the free axes of `b`.
    fn contract(
        &self,
        a: &DenseTensor,
        b: &DenseTensor,
        axes_a: &[usize],
        axes_b: &[usize],
    ) -> BackendResult<DenseTensor>;

    /// SVD of `tensor` viewed as a matrix with `row_axes` as rows and the
    /// remaining axes (ascending) as columns. Keeps at most `max_rank`
    /// singular values above `cutoff`, and always at least one.
    fn svd(
        &self,
        tensor: &DenseTensor,
        row_axes: &[usize],
        max_rank: usize,
        cutoff: f64,
    ) -> BackendResult<SvdFactors>;

    /// Move per-rank buffers according to `pattern`. `send` and `recv` are
    /// indexed by global rank; data is always copied.
    fn collective_exchange(
        &self,
        send: &[Vec<C64>],
        recv: &mut [Vec<C64>],
        pattern: &ExchangePattern,
    ) -> BackendResult<()>;

    fn device_info(&self) -> DeviceInfo;
}

/// Select a backend strategy by name.
pub fn select_backend(name: &str) -> BackendResult<Arc<dyn ComputeBackend>> {
    match name {
        "cpu" | "cpu-serial" => Ok(Arc::new(CpuBackend::serial())),
        "cpu-rayon" => Ok(Arc::new(CpuBackend::rayon())),
        other => Err(BackendError::Unavailable(other.to_string())),
    }
}
