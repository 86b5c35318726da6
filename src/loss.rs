//! Convex loss functions for linear models.
//!
//! A [`LossKind`] evaluates the loss of a prediction `p` against a label `y` together with its
//! derivative with respect to `p`. Classification losses expect labels in `{-1, +1}`, regression
//! losses take any real label.
//!
//! ```
//! # use xaynet_vfl::loss::LossKind;
//! let hinge = LossKind::Hinge { threshold: 1.0 };
//! assert_eq!(hinge.loss(0.5, 1.0), 0.5);
//! assert_eq!(hinge.dloss(0.5, 1.0), -1.0);
//! ```

use serde::{Deserialize, Serialize};

/// Exponent beyond which the log loss switches to its asymptotes.
const LOG_CLIP: f64 = 18.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// A loss function together with its parameters.
pub enum LossKind {
    /// A smoothed hinge loss, quadratic near the margin and linear far below it.
    ModifiedHuber,
    /// The hinge loss `max(0, threshold - p * y)`. A threshold of `1` gives the SVM loss, `0` the
    /// perceptron loss.
    Hinge { threshold: f64 },
    /// The squared hinge loss `max(0, threshold - p * y)^2`.
    SquaredHinge { threshold: f64 },
    /// The logistic loss `ln(1 + exp(-p * y))`.
    Log,
    /// The least squares loss `0.5 * (p - y)^2`.
    SquaredLoss,
    /// The Huber loss: quadratic for residuals up to `c`, linear beyond.
    Huber { c: f64 },
    /// The epsilon insensitive loss `max(0, |y - p| - epsilon)`.
    EpsilonInsensitive { epsilon: f64 },
    /// The squared epsilon insensitive loss `max(0, |y - p| - epsilon)^2`.
    SquaredEpsilonInsensitive { epsilon: f64 },
}

impl Default for LossKind {
    fn default() -> Self {
        LossKind::Hinge { threshold: 1.0 }
    }
}

impl LossKind {
    /// Checks whether this is a classification loss, i.e. labels are expected in `{-1, +1}`.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            LossKind::ModifiedHuber
                | LossKind::Hinge { .. }
                | LossKind::SquaredHinge { .. }
                | LossKind::Log
        )
    }

    /// Evaluates the loss of the prediction `p` for the label `y`.
    pub fn loss(&self, p: f64, y: f64) -> f64 {
        match *self {
            LossKind::ModifiedHuber => {
                let z = p * y;
                if z >= 1.0 {
                    0.0
                } else if z >= -1.0 {
                    (1.0 - z) * (1.0 - z)
                } else {
                    -4.0 * z
                }
            }
            LossKind::Hinge { threshold } => {
                let z = p * y;
                if z <= threshold {
                    threshold - z
                } else {
                    0.0
                }
            }
            LossKind::SquaredHinge { threshold } => {
                let z = threshold - p * y;
                if z > 0.0 {
                    z * z
                } else {
                    0.0
                }
            }
            LossKind::Log => {
                let z = p * y;
                if z > LOG_CLIP {
                    (-z).exp()
                } else if z < -LOG_CLIP {
                    -z
                } else {
                    (-z).exp().ln_1p()
                }
            }
            LossKind::SquaredLoss => 0.5 * (p - y) * (p - y),
            LossKind::Huber { c } => {
                let r = p - y;
                let abs_r = r.abs();
                if abs_r <= c {
                    0.5 * r * r
                } else {
                    c * abs_r - 0.5 * c * c
                }
            }
            LossKind::EpsilonInsensitive { epsilon } => ((y - p).abs() - epsilon).max(0.0),
            LossKind::SquaredEpsilonInsensitive { epsilon } => {
                let r = (y - p).abs() - epsilon;
                if r > 0.0 {
                    r * r
                } else {
                    0.0
                }
            }
        }
    }

    /// Evaluates the derivative of the loss with respect to the prediction `p`.
    pub fn dloss(&self, p: f64, y: f64) -> f64 {
        match *self {
            LossKind::ModifiedHuber => {
                let z = p * y;
                if z >= 1.0 {
                    0.0
                } else if z >= -1.0 {
                    2.0 * (1.0 - z) * -y
                } else {
                    -4.0 * y
                }
            }
            LossKind::Hinge { threshold } => {
                if p * y <= threshold {
                    -y
                } else {
                    0.0
                }
            }
            LossKind::SquaredHinge { threshold } => {
                let z = threshold - p * y;
                if z > 0.0 {
                    -2.0 * y * z
                } else {
                    0.0
                }
            }
            LossKind::Log => {
                let z = p * y;
                if z > LOG_CLIP {
                    -y * (-z).exp()
                } else if z < -LOG_CLIP {
                    -y
                } else {
                    -y / (z.exp() + 1.0)
                }
            }
            LossKind::SquaredLoss => p - y,
            LossKind::Huber { c } => {
                let r = p - y;
                if r.abs() <= c {
                    r
                } else if r > 0.0 {
                    c
                } else {
                    -c
                }
            }
            LossKind::EpsilonInsensitive { epsilon } => {
                if y - p > epsilon {
                    -1.0
                } else if p - y > epsilon {
                    1.0
                } else {
                    0.0
                }
            }
            LossKind::SquaredEpsilonInsensitive { epsilon } => {
                let z = y - p;
                if z > epsilon {
                    -2.0 * (z - epsilon)
                } else if z < -epsilon {
                    2.0 * (-z - epsilon)
                } else {
                    0.0
                }
            }
        }
    }
}
