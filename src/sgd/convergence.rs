//! Convergence tracking across epochs.
//!
//! The monitor is fed one value per epoch: either the score on the held out validation samples,
//! where larger is better, or the summed training loss, where smaller is better.

use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
/// The state of the monitor after the most recent epoch.
pub enum MonitorState {
    /// No epoch was observed yet.
    #[display(fmt = "running")]
    Running,
    /// The last epoch made progress.
    #[display(fmt = "improving")]
    Improving,
    /// The last epoch made no progress, but not often enough in a row to stop.
    #[display(fmt = "stalled")]
    Stalled,
    /// Too many epochs in a row made no progress.
    #[display(fmt = "converged")]
    Converged,
    /// The weights became non-finite.
    #[display(fmt = "diverged")]
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// What the monitor observes each epoch.
pub enum Criterion {
    /// A validation score, larger is better.
    ValidationScore,
    /// The summed loss over `n_samples` training samples, smaller is better.
    TrainingLoss { n_samples: usize },
}

#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    criterion: Criterion,
    tol: Option<f64>,
    n_iter_no_change: usize,
    best_score: f64,
    best_loss: f64,
    no_improvement_count: usize,
    state: MonitorState,
}

impl ConvergenceMonitor {
    /// Creates a monitor. If `tol` is `None`, epochs never count as stalled.
    pub fn new(criterion: Criterion, tol: Option<f64>, n_iter_no_change: usize) -> Self {
        Self {
            criterion,
            tol,
            n_iter_no_change,
            best_score: f64::NEG_INFINITY,
            best_loss: f64::INFINITY,
            no_improvement_count: 0,
            state: MonitorState::Running,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn no_improvement_count(&self) -> usize {
        self.no_improvement_count
    }

    /// Gets the best value observed so far.
    pub fn best(&self) -> f64 {
        match self.criterion {
            Criterion::ValidationScore => self.best_score,
            Criterion::TrainingLoss { .. } => self.best_loss,
        }
    }

    /// Observes the value of the latest epoch and returns the new state.
    pub fn observe(&mut self, value: f64) -> MonitorState {
        let progress = match (self.criterion, self.tol) {
            (_, None) => true,
            (Criterion::ValidationScore, Some(tol)) => value > self.best_score + tol,
            (Criterion::TrainingLoss { n_samples }, Some(tol)) => {
                value < self.best_loss - tol * n_samples as f64
            }
        };
        match self.criterion {
            Criterion::ValidationScore => self.best_score = self.best_score.max(value),
            Criterion::TrainingLoss { .. } => self.best_loss = self.best_loss.min(value),
        }

        self.state = if progress {
            self.no_improvement_count = 0;
            MonitorState::Improving
        } else {
            self.no_improvement_count += 1;
            if self.no_improvement_count >= self.n_iter_no_change {
                MonitorState::Converged
            } else {
                MonitorState::Stalled
            }
        };
        self.state
    }

    /// Resets the counter after the learning rate was decayed, so the fit continues.
    pub fn rearm(&mut self) {
        self.no_improvement_count = 0;
        self.state = MonitorState::Stalled;
    }

    /// Marks the fit as diverged. This is final.
    pub fn diverge(&mut self) {
        self.state = MonitorState::Diverged;
    }
}
