use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// One row per basis state: index, big-endian bitstring, probability.
pub fn write_probabilities_csv(path: impl AsRef<Path>, num_qubits: usize, probs: &[f64]) -> io::Result<()> {
    let mut f = File::create(path)?;
    writeln!(f, "index,bitstring,probability")?;
    for (i, p) in probs.iter().enumerate() {
        writeln!(f, "{},{:0width$b},{}", i, i, p, width = num_qubits)?;
    }
    Ok(())
}
