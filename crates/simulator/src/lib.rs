pub mod batch;
pub mod circuit;
pub mod config;
pub mod engine;
mod output;

pub use batch::{batch_run, BatchResult, Trajectory};
pub use circuit::{Circuit, Operation};
pub use config::SimConfig;
pub use engine::{RunReport, Simulator};
pub use output::write_probabilities_csv;
