//! State representations and the gate/noise engine.
//!
//! Qubit 0 is the most significant bit of a dense amplitude index and the
//! first site of an MPS chain.

pub mod density;
pub mod entangled;
pub mod entropy;
pub mod error;
pub mod gates;
pub mod measurement;
pub mod mps_ops;
pub mod noise;
pub mod state;
pub mod statevector;
pub mod tomography;

pub use density::DensityMatrix;
pub use error::{QuantumError, QuantumResult};
pub use gates::{Gate, C64};
pub use noise::KrausChannel;
pub use state::{QuantumState, RepresentationChange, RepresentationKind};
pub use statevector::StateVector;
pub use tomography::{measure_tomography, Tomography};

/// Default memory ceiling for a single dense representation.
pub const DEFAULT_MEMORY_CEILING: u64 = 4 << 30;

const AMPLITUDE_BYTES: u128 = 16;

/// Bytes needed for `2^n` complex amplitudes.
pub fn dense_bytes(num_qubits: usize) -> u128 {
    AMPLITUDE_BYTES.checked_shl(num_qubits as u32).unwrap_or(u128::MAX)
}

/// Bytes needed for a `2^n x 2^n` density matrix.
pub fn density_bytes(num_qubits: usize) -> u128 {
    AMPLITUDE_BYTES
        .checked_shl(2 * num_qubits as u32)
        .unwrap_or(u128::MAX)
}

pub(crate) fn check_ceiling(
    what: &'static str,
    num_qubits: usize,
    required: u128,
    ceiling: u64,
) -> QuantumResult<()> {
    if num_qubits >= 64 || required > ceiling as u128 {
        return Err(QuantumError::ResourceExceeded {
            what,
            num_qubits,
            required,
            ceiling,
        });
    }
    Ok(())
}
