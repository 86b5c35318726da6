//! Regularization penalties.
//!
//! L2 shrinkage is applied as a multiplicative rescaling of the whole weight vector. L1 uses the
//! truncated gradient with cumulative penalties: the penalty owed by a feature is only applied
//! when the feature is part of a sample.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::weights::WeightVector;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The regularization term added to the loss.
pub enum Penalty {
    #[display(fmt = "none")]
    None,
    #[display(fmt = "l1")]
    L1,
    #[display(fmt = "l2")]
    L2,
    /// A convex combination of L1 and L2, mixed by `l1_ratio`.
    #[display(fmt = "elasticnet")]
    ElasticNet,
}

impl Default for Penalty {
    fn default() -> Self {
        Penalty::L2
    }
}

impl Penalty {
    /// Gets the share of the L1 term given the configured ElasticNet mixing ratio.
    pub fn l1_ratio(self, configured: f64) -> f64 {
        match self {
            Penalty::None | Penalty::L2 => 0.0,
            Penalty::L1 => 1.0,
            Penalty::ElasticNet => configured,
        }
    }

    /// Checks whether the weights are shrunk multiplicatively each sample.
    pub fn has_l2(self) -> bool {
        matches!(self, Penalty::L2 | Penalty::ElasticNet)
    }

    /// Checks whether the truncated gradient is applied.
    pub fn has_l1(self) -> bool {
        matches!(self, Penalty::L1 | Penalty::ElasticNet)
    }

    /// Computes the factor the weights are scaled by in an L2 step.
    ///
    /// Clamped at zero so that large steps zero the weights instead of flipping their signs.
    pub fn l2_factor(self, l1_ratio: f64, eta: f64, alpha: f64) -> f64 {
        (1.0 - (1.0 - l1_ratio) * eta * alpha).max(0.0)
    }
}

#[derive(Debug, Clone)]
/// Bookkeeping for the lazily applied L1 penalty.
pub struct L1Tracker {
    /// The total penalty a single feature would have received so far.
    u: f64,
    /// The signed penalty actually applied to each feature.
    q: Vec<f64>,
}

impl L1Tracker {
    pub fn new(n_features: usize) -> Self {
        Self {
            u: 0.0,
            q: vec![0.0; n_features],
        }
    }

    /// Accumulates the penalty of the current sample and applies what is owed to the touched
    /// features.
    pub fn apply(
        &mut self,
        weights: &mut WeightVector,
        indices: &[usize],
        l1_ratio: f64,
        eta: f64,
        alpha: f64,
    ) {
        self.u += l1_ratio * eta * alpha;
        for &idx in indices {
            self.q[idx] += weights.l1_truncate(idx, self.u, self.q[idx]);
        }
    }

    /// Gets the penalty applied to each feature.
    pub fn applied(&self) -> &[f64] {
        &self.q
    }
}
