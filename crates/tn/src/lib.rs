//! Matrix-product-state chain with canonical-form maintenance and
//! budgeted SVD truncation.
//!
//! Site `0` carries the most significant bit of the dense amplitude index,
//! so `to_dense` and a big-endian dense state vector agree element-wise.

pub mod env;
pub mod error;
pub mod mps;
pub mod truncation;

pub use error::{TnError, TnResult};
pub use mps::{Mps, Tensor3, C64};
pub use truncation::{BudgetConfig, BudgetPolicy, ErrorAggregation, Truncation, TruncationBudget};
