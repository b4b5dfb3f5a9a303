use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{TnError, TnResult};

/// Per-SVD truncation rule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Truncation {
    pub max_bond: usize,
    pub cutoff: f64,
}

impl Default for Truncation {
    fn default() -> Self {
        Self {
            max_bond: 64,
            cutoff: 1e-12,
        }
    }
}

/// How individual discarded weights combine into the running total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAggregation {
    /// `sum(eps_i)`
    #[default]
    Sum,
    /// `1 - prod(1 - eps_i)`
    Fidelity,
}

/// What to do once the budget threshold is crossed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Refuse the truncation; the caller may retry with a larger bond.
    #[default]
    Fail,
    /// Keep going and log a warning carrying the accumulated value.
    Warn,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub threshold: f64,
    pub policy: BudgetPolicy,
    pub aggregation: ErrorAggregation,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            threshold: 1e-3,
            policy: BudgetPolicy::Fail,
            aggregation: ErrorAggregation::Sum,
        }
    }
}

/// Monotone record of probability mass discarded by SVD truncations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruncationBudget {
    config: BudgetConfig,
    sum: f64,
    fidelity: f64,
    truncations: u64,
    exceeded: bool,
}

impl TruncationBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            sum: 0.0,
            fidelity: 1.0,
            truncations: 0,
            exceeded: false,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Accumulated error under the configured aggregation.
    pub fn accumulated(&self) -> f64 {
        match self.config.aggregation {
            ErrorAggregation::Sum => self.sum,
            ErrorAggregation::Fidelity => 1.0 - self.fidelity,
        }
    }

    /// Number of truncations that discarded non-zero weight.
    pub fn truncations(&self) -> u64 {
        self.truncations
    }

    /// True once the threshold has been crossed under the `Warn` policy.
    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    pub fn check(&self) -> TnResult<()> {
        let accumulated = self.accumulated();
        if accumulated > self.config.threshold {
            return Err(TnError::TruncationBudgetExceeded {
                accumulated,
                threshold: self.config.threshold,
            });
        }
        Ok(())
    }

    /// Account for one truncation. Under `Fail` an overrun leaves the
    /// budget untouched and reports the would-be total.
    pub fn record(&mut self, discarded: f64) -> TnResult<()> {
        if discarded <= 0.0 {
            return Ok(());
        }
        let mut next = self.clone();
        next.sum += discarded;
        next.fidelity *= 1.0 - discarded.min(1.0);
        next.truncations += 1;

        let accumulated = next.accumulated();
        if accumulated > self.config.threshold {
            match self.config.policy {
                BudgetPolicy::Fail => {
                    return Err(TnError::TruncationBudgetExceeded {
                        accumulated,
                        threshold: self.config.threshold,
                    });
                }
                BudgetPolicy::Warn => {
                    warn!(
                        accumulated,
                        threshold = self.config.threshold,
                        "truncation budget exceeded"
                    );
                    next.exceeded = true;
                }
            }
        }
        *self = next;
        Ok(())
    }
}

impl Default for TruncationBudget {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_aggregation_adds() {
        let mut b = TruncationBudget::new(BudgetConfig {
            threshold: 1.0,
            ..Default::default()
        });
        b.record(0.1).unwrap();
        b.record(0.2).unwrap();
        assert!((b.accumulated() - 0.3).abs() < 1e-15);
        assert_eq!(b.truncations(), 2);
    }

    #[test]
    fn fidelity_aggregation_is_tighter() {
        let config = BudgetConfig {
            threshold: 1.0,
            aggregation: ErrorAggregation::Fidelity,
            ..Default::default()
        };
        let mut b = TruncationBudget::new(config);
        b.record(0.1).unwrap();
        b.record(0.2).unwrap();
        let expected = 1.0 - 0.9 * 0.8;
        assert!((b.accumulated() - expected).abs() < 1e-15);
        assert!(b.accumulated() < 0.3);
    }

    #[test]
    fn fail_policy_rejects_and_keeps_state() {
        let mut b = TruncationBudget::new(BudgetConfig {
            threshold: 0.15,
            ..Default::default()
        });
        b.record(0.1).unwrap();
        match b.record(0.1) {
            Err(TnError::TruncationBudgetExceeded { accumulated, threshold }) => {
                assert!((accumulated - 0.2).abs() < 1e-15);
                assert_eq!(threshold, 0.15);
            }
            other => panic!("expected budget error, got {:?}", other),
        }
        assert!((b.accumulated() - 0.1).abs() < 1e-15);
    }

    #[test]
    fn warn_policy_continues() {
        let mut b = TruncationBudget::new(BudgetConfig {
            threshold: 0.05,
            policy: BudgetPolicy::Warn,
            ..Default::default()
        });
        b.record(0.1).unwrap();
        assert!(b.exceeded());
        assert!(b.check().is_err());
    }

    #[test]
    fn zero_discard_is_not_counted() {
        let mut b = TruncationBudget::default();
        b.record(0.0).unwrap();
        assert_eq!(b.truncations(), 0);
    }
}
