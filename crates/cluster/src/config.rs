use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simulator::SimConfig;

use crate::error::{ClusterError, ClusterResult};
use crate::mesh::MeshShape;

/// Structured launch configuration for a distributed job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub num_qubits: usize,
    pub mesh_shape: MeshShape,
    pub seed: u64,
    pub backend_name: String,
    /// Root directory for checkpoint generations; `None` disables them.
    pub checkpoint_path: Option<PathBuf>,
    pub bond_dim: usize,
    /// Gates between checkpoints; 0 never checkpoints.
    pub checkpoint_interval: u64,
    /// Longest allowed gap between checkpoint boundaries; 0 disables.
    pub checkpoint_timeout_ms: u64,
    /// Complete generations kept after each new checkpoint.
    pub keep_generations: usize,
    pub sim: SimConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            num_qubits: 4,
            mesh_shape: MeshShape::single(),
            seed: 0,
            backend_name: "cpu".to_string(),
            checkpoint_path: None,
            bond_dim: 64,
            checkpoint_interval: 0,
            checkpoint_timeout_ms: 0,
            keep_generations: 2,
            sim: SimConfig::default(),
        }
    }
}

impl JobConfig {
    pub fn new(num_qubits: usize, mesh_shape: MeshShape, seed: u64) -> Self {
        Self {
            num_qubits,
            mesh_shape,
            seed,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ClusterResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ClusterError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClusterResult<()> {
        if self.num_qubits == 0 {
            return Err(ClusterError::Validation("num_qubits must be at least 1".into()));
        }
        if self.bond_dim == 0 {
            return Err(ClusterError::Validation("bond_dim must be at least 1".into()));
        }
        if self.checkpoint_interval > 0 && self.checkpoint_path.is_none() {
            return Err(ClusterError::Validation(
                "checkpoint_interval is set but checkpoint_path is not".into(),
            ));
        }
        if self.keep_generations == 0 {
            return Err(ClusterError::Validation("keep_generations must be at least 1".into()));
        }
        self.sim_config().validate()?;
        Ok(())
    }

    /// Simulator settings with the job-level bond dimension applied.
    pub fn sim_config(&self) -> SimConfig {
        self.sim.clone().with_bond_dim(self.bond_dim)
    }

    pub fn with_backend(mut self, name: impl Into<String>) -> Self {
        self.backend_name = name.into();
        self
    }

    pub fn with_checkpoints(mut self, path: impl Into<PathBuf>, interval: u64) -> Self {
        self.checkpoint_path = Some(path.into());
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_bond_dim(mut self, bond_dim: usize) -> Self {
        self.bond_dim = bond_dim;
        self
    }

    pub fn with_checkpoint_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.checkpoint_timeout_ms = timeout_ms;
        self
    }

    pub fn with_keep_generations(mut self, keep: usize) -> Self {
        self.keep_generations = keep;
        self
    }

    pub fn with_sim(mut self, sim: SimConfig) -> Self {
        self.sim = sim;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(
            &path,
            r#"{
                "num_qubits": 10,
                "mesh_shape": [2, 4],
                "seed": 7,
                "checkpoint_path": "/tmp/ckpt",
                "checkpoint_interval": 5,
                "sim": { "exact_threshold": 8 }
            }"#,
        )
        .unwrap();
        let config = JobConfig::from_json_file(&path).unwrap();
        assert_eq!(config.mesh_shape.world_size(), 8);
        assert_eq!(config.bond_dim, 64);
        assert_eq!(config.sim.exact_threshold, 8);
        assert_eq!(config.backend_name, "cpu");
    }

    #[test]
    fn interval_without_path_is_rejected() {
        let mut config = JobConfig::new(4, MeshShape::single(), 1);
        config.checkpoint_interval = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_mesh_in_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, r#"{ "mesh_shape": [3] }"#).unwrap();
        assert!(JobConfig::from_json_file(&path).is_err());
    }
}
