//! Learning rate schedules.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::loss::LossKind;

/// The adaptive schedule stops decaying once the learning rate is at or below this value.
pub const ETA_FLOOR: f64 = 1e-6;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The policy selecting the step size.
pub enum LearningRate {
    /// `eta = eta0`
    #[display(fmt = "constant")]
    Constant,
    /// `eta = 1 / (alpha * (t0 + t - 1))`
    #[display(fmt = "optimal")]
    Optimal,
    /// `eta = eta0 / t^power_t`
    #[display(fmt = "invscaling")]
    #[serde(rename = "invscaling")]
    InvScaling,
    /// `eta = eta0`, halved each time the fit stops improving.
    #[display(fmt = "adaptive")]
    Adaptive,
    /// Passive-aggressive I: `step = min(C, loss / |x|^2)`
    #[display(fmt = "pa1")]
    Pa1,
    /// Passive-aggressive II: `step = loss / (|x|^2 + 0.5 / C)`
    #[display(fmt = "pa2")]
    Pa2,
}

impl Default for LearningRate {
    fn default() -> Self {
        LearningRate::Optimal
    }
}

impl LearningRate {
    /// Checks whether this is one of the passive-aggressive policies.
    pub fn is_passive_aggressive(self) -> bool {
        matches!(self, LearningRate::Pa1 | LearningRate::Pa2)
    }

    /// Checks whether the policy reads `eta0`.
    pub fn uses_eta0(self) -> bool {
        matches!(
            self,
            LearningRate::Constant | LearningRate::InvScaling | LearningRate::Adaptive
        )
    }
}

#[derive(Debug, Clone)]
/// The learning rate state of a fit.
pub struct Scheduler {
    policy: LearningRate,
    eta: f64,
    eta0: f64,
    alpha: f64,
    power_t: f64,
    optimal_init: f64,
    t: f64,
}

impl Scheduler {
    /// Creates a scheduler starting at iteration `t`.
    ///
    /// For the optimal schedule the offset is chosen such that the learning rate of the first
    /// sample is derived from the loss slope at a typical weight magnitude.
    pub fn new(
        policy: LearningRate,
        loss: &LossKind,
        eta0: f64,
        alpha: f64,
        power_t: f64,
        t: f64,
    ) -> Self {
        let optimal_init = if policy == LearningRate::Optimal {
            let typw = (1.0 / alpha.sqrt()).sqrt();
            let initial_eta0 = typw / loss.dloss(-typw, 1.0).max(1.0);
            1.0 / (initial_eta0 * alpha)
        } else {
            0.0
        };
        Self {
            policy,
            eta: eta0,
            eta0,
            alpha,
            power_t,
            optimal_init,
            t,
        }
    }

    pub fn policy(&self) -> LearningRate {
        self.policy
    }

    /// Gets the learning rate of the most recent sample.
    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Gets the iteration counter.
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Updates and returns the learning rate for the current sample.
    pub fn eta_for_sample(&mut self) -> f64 {
        match self.policy {
            LearningRate::Optimal => {
                self.eta = 1.0 / (self.alpha * (self.optimal_init + self.t - 1.0));
            }
            LearningRate::InvScaling => {
                self.eta = self.eta0 / self.t.powf(self.power_t);
            }
            _ => {}
        }
        self.eta
    }

    /// Advances the iteration counter after a sample was processed.
    pub fn tick(&mut self) {
        self.t += 1.0;
    }

    /// Halves the learning rate of the adaptive schedule.
    ///
    /// Returns `false` if the schedule is not adaptive or the learning rate already reached its
    /// floor, in which case the fit should terminate.
    pub fn decay(&mut self) -> bool {
        if self.policy == LearningRate::Adaptive && self.eta > ETA_FLOOR {
            self.eta /= 2.0;
            true
        } else {
            false
        }
    }
}
