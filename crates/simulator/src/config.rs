use quantum::{QuantumError, QuantumResult, DEFAULT_MEMORY_CEILING};
use serde::{Deserialize, Serialize};
use tn::{BudgetConfig, BudgetPolicy, Truncation};

/// Single-process simulation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Largest register simulated with a dense vector; above it an MPS is used.
    pub exact_threshold: usize,
    pub bond_dim: usize,
    /// Upper bound for adaptive bond-dimension retries.
    pub max_bond_dim: usize,
    pub svd_cutoff: f64,
    pub memory_ceiling_bytes: u64,
    pub budget: BudgetConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 12,
            bond_dim: 64,
            max_bond_dim: 1024,
            svd_cutoff: 1e-12,
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING,
            budget: BudgetConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> QuantumResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| QuantumError::Validation(format!("invalid simulator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QuantumResult<()> {
        if self.bond_dim == 0 {
            return Err(QuantumError::Validation("bond_dim must be at least 1".into()));
        }
        if self.max_bond_dim < self.bond_dim {
            return Err(QuantumError::Validation(format!(
                "max_bond_dim {} is below bond_dim {}",
                self.max_bond_dim, self.bond_dim
            )));
        }
        if self.svd_cutoff.is_nan() || self.svd_cutoff < 0.0 {
            return Err(QuantumError::Validation("svd_cutoff must be non-negative".into()));
        }
        if self.budget.threshold.is_nan() || self.budget.threshold < 0.0 {
            return Err(QuantumError::Validation(
                "truncation budget threshold must be non-negative".into(),
            ));
        }
        Ok(())
    }

    pub fn truncation(&self) -> Truncation {
        Truncation {
            max_bond: self.bond_dim,
            cutoff: self.svd_cutoff,
        }
    }

    pub fn with_exact_threshold(mut self, qubits: usize) -> Self {
        self.exact_threshold = qubits;
        self
    }

    pub fn with_bond_dim(mut self, bond_dim: usize) -> Self {
        self.bond_dim = bond_dim;
        self.max_bond_dim = self.max_bond_dim.max(bond_dim);
        self
    }

    pub fn with_max_bond_dim(mut self, bond_dim: usize) -> Self {
        self.max_bond_dim = bond_dim;
        self
    }

    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling_bytes = bytes;
        self
    }

    pub fn with_budget_threshold(mut self, threshold: f64) -> Self {
        self.budget.threshold = threshold;
        self
    }

    pub fn with_budget_policy(mut self, policy: BudgetPolicy) -> Self {
        self.budget.policy = policy;
        self
    }
}
