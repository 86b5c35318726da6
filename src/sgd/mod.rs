//! Streaming SGD for linear models with a remote residual.
//!
//! The [`Trainer`] runs epochs over a [`Dataset`]. For every training sample it computes the
//! partial prediction `p = w·x + intercept` of the host, exchanges it with the guest for the
//! decrypted residual `r` (the derivative of the loss at the joint prediction) and takes the step
//! `update = -eta * r`, weighted by the class and sample weights:
//!
//! ```text
//! w <- w * max(0, 1 - (1 - l1_ratio) * eta * alpha)      (L2, ElasticNet)
//! w <- w + update * x
//! intercept <- intercept + update * intercept_decay
//! w_i <- truncate(w_i, owed L1 penalty)                   (L1, ElasticNet)
//! ```
//!
//! The passive-aggressive policies replace the step size by the closed form of the current
//! sample's loss and norm, in the direction opposite to the residual.
//!
//! After each epoch the weights are checked for divergence and convergence is evaluated either on
//! the training loss or, with early stopping, on the score of held out samples.

pub mod cancel;
pub mod convergence;
pub mod penalty;
pub mod schedule;
pub mod validation;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use derive_more::Display;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;
use validator::{Validate, ValidationErrors};

use self::{
    cancel::Cancellation,
    convergence::{ConvergenceMonitor, Criterion, MonitorState},
    penalty::L1Tracker,
    schedule::{LearningRate, Scheduler},
    validation::Scorer,
};
use crate::{
    crypto::CipherSuite,
    dataset::Dataset,
    secure::{ExchangeSettings, SecureUpdate, SecureUpdateError},
    session::{Session, Transfer},
    settings::SgdSettings,
    weights::WeightVector,
};

/// Residuals are clipped to this magnitude before they enter an update.
pub const MAX_DLOSS: f64 = 1e12;

#[derive(Debug, Error)]
/// Errors of a fit.
pub enum FitError {
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] ValidationErrors),
    #[error("validation mask has {actual} entries, but the dataset has {expected} samples")]
    ValidationMask { expected: usize, actual: usize },
    #[error("early stopping requires a validation mask and scorer")]
    MissingScorer,
    #[error("the dataset is empty")]
    EmptyDataset,
    #[error("{what} have {actual} entries, but the dataset has {expected} features")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(
        "floating-point under-/overflow occurred at epoch {epoch}, \
         rescaling the input features might help"
    )]
    /// The weights weren't finite anymore after this epoch, counted from 1.
    Diverged { epoch: u32 },
    #[error("secure update failed: {0}")]
    Exchange(#[from] SecureUpdateError),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
/// Why a fit stopped.
pub enum Termination {
    /// All `max_iter` epochs ran.
    #[display(fmt = "max_iter reached")]
    MaxIter,
    /// The convergence criterion stopped improving.
    #[display(fmt = "converged")]
    Converged,
    /// The adaptive learning rate could not be decayed any further.
    #[display(fmt = "learning rate floor reached")]
    LearningRateFloor,
    /// The fit was cancelled at an epoch boundary.
    #[display(fmt = "cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
/// The model a fit starts from.
pub struct InitialModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// The running average to continue, if a previous fit averaged already.
    pub average_weights: Option<Vec<f64>>,
    pub average_intercept: f64,
    /// The iteration counter. `1` for a fresh fit.
    pub t: f64,
}

impl InitialModel {
    /// Creates an all zero model.
    pub fn zeros(n_features: usize) -> Self {
        Self {
            weights: vec![0.0; n_features],
            intercept: 0.0,
            average_weights: None,
            average_intercept: 0.0,
            t: 1.0,
        }
    }

    /// Continues from the outcome of a previous fit.
    pub fn warm_start(outcome: &FitOutcome) -> Self {
        Self {
            weights: outcome.weights.clone(),
            intercept: outcome.intercept,
            average_weights: outcome.average_weights.clone(),
            average_intercept: outcome.average_intercept.unwrap_or(0.0),
            t: outcome.t,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The result of a fit.
pub struct FitOutcome {
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// The averaged weights, if averaging started.
    pub average_weights: Option<Vec<f64>>,
    /// The averaged intercept, if averaging started.
    pub average_intercept: Option<f64>,
    /// The number of epochs run.
    pub epochs: u32,
    /// The iteration counter after the last sample.
    pub t: f64,
    pub termination: Termination,
    /// The number of samples skipped because their residual couldn't be obtained.
    pub skipped_samples: u64,
}

struct Validation {
    mask: Vec<bool>,
    scorer: Scorer,
}

/// Fits a linear model together with a guest.
///
/// # Examples
/// ```no_run
/// # use xaynet_vfl::{
/// #     crypto::Plaintext,
/// #     dataset::{Dataset, SparseDataset},
/// #     session::{pair, Session, SessionId},
/// #     settings::SgdSettings,
/// #     sgd::{InitialModel, Trainer},
/// # };
/// # async fn run(mut dataset: SparseDataset) -> Result<(), Box<dyn std::error::Error>> {
/// let (host, _guest) = pair(SessionId::from(1));
/// let outcome = Trainer::new(SgdSettings::default(), Plaintext, Session::new(SessionId::from(1), host))
///     .fit(InitialModel::zeros(dataset.n_features()), &mut dataset)
///     .await?;
/// println!("{:?} after {} epochs", outcome.weights, outcome.epochs);
/// # Ok(())
/// # }
/// ```
pub struct Trainer<C, T>
where
    C: CipherSuite,
{
    settings: SgdSettings,
    suite: C,
    session: Session<T>,
    validation: Option<Validation>,
    exchange: ExchangeSettings,
    context: Option<Arc<C::Context>>,
    cancellation: Option<Cancellation>,
}

impl<C, T> Trainer<C, T>
where
    C: CipherSuite,
    T: Transfer,
{
    pub fn new(settings: SgdSettings, suite: C, session: Session<T>) -> Self {
        Self {
            settings,
            suite,
            session,
            validation: None,
            exchange: ExchangeSettings::default(),
            context: None,
            cancellation: None,
        }
    }

    /// Holds out the masked samples from training. The scorer is evaluated on them after every
    /// epoch if early stopping is enabled.
    pub fn with_validation(mut self, mask: Vec<bool>, scorer: Scorer) -> Self {
        self.validation = Some(Validation { mask, scorer });
        self
    }

    pub fn with_exchange(mut self, exchange: ExchangeSettings) -> Self {
        self.exchange = exchange;
        self
    }

    /// Uses the given key pair instead of generating one for this fit. Only its public part is
    /// sent to the guest.
    pub fn with_context(mut self, context: Arc<C::Context>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Fits the model, starting from `initial`.
    ///
    /// # Errors
    /// Fails if the settings or shapes are invalid, if the weights diverge or if the exchange
    /// with the guest fails.
    pub async fn fit<D>(
        self,
        initial: InitialModel,
        dataset: &mut D,
    ) -> Result<FitOutcome, FitError>
    where
        D: Dataset,
    {
        let span = info_span!("fit", session = %self.session.id());
        self.fit_inner(initial, dataset).instrument(span).await
    }

    async fn fit_inner<D>(
        self,
        initial: InitialModel,
        dataset: &mut D,
    ) -> Result<FitOutcome, FitError>
    where
        D: Dataset,
    {
        let Self {
            settings,
            suite,
            session,
            validation,
            exchange,
            context,
            cancellation,
        } = self;
        check_inputs(&settings, &initial, validation.as_ref(), dataset)?;

        let n_samples = dataset.sample_count();
        let (mask, mut scorer) = match validation {
            Some(Validation { mask, scorer }) => (mask, Some(scorer)),
            None => (vec![false; n_samples], None),
        };
        let train_count = mask.iter().filter(|masked| !**masked).count();

        let loss = settings.loss;
        let penalty = settings.penalty;
        let alpha = settings.alpha;
        let l1_ratio = penalty.l1_ratio(settings.l1_ratio);
        let passive_aggressive = settings.learning_rate.is_passive_aggressive();

        let mut scheduler = Scheduler::new(
            settings.learning_rate,
            &loss,
            settings.eta0,
            alpha,
            settings.power_t,
            initial.t,
        );
        let n_features = initial.weights.len();
        let average_buffer = if settings.average > 0 {
            Some(
                initial
                    .average_weights
                    .unwrap_or_else(|| vec![0.0; n_features]),
            )
        } else {
            None
        };
        let mut weights = WeightVector::new(initial.weights, average_buffer);
        let mut l1 = if penalty.has_l1() {
            Some(L1Tracker::new(weights.len()))
        } else {
            None
        };
        let mut intercept = initial.intercept;
        let mut average_intercept = initial.average_intercept;
        let mut averaging_started = settings.average > 0 && initial.t > settings.average as f64;

        let criterion = if settings.early_stopping {
            Criterion::ValidationScore
        } else {
            Criterion::TrainingLoss {
                n_samples: train_count,
            }
        };
        let mut monitor =
            ConvergenceMonitor::new(criterion, settings.tol, settings.n_iter_no_change as usize);

        debug!(
            "fitting {:?} on {} samples ({} held out), penalty {}, learning rate {}",
            loss,
            train_count,
            n_samples - train_count,
            penalty,
            settings.learning_rate
        );
        let mut secure = SecureUpdate::connect(suite, session, exchange, context).await?;

        let mut termination = Termination::MaxIter;
        let mut epochs = 0;
        for epoch in 0..settings.max_iter {
            if cancellation
                .as_ref()
                .map_or(false, Cancellation::is_cancelled)
            {
                info!("fit cancelled after {} epochs", epochs);
                termination = Termination::Cancelled;
                break;
            }
            if settings.shuffle {
                dataset.shuffle(settings.seed.wrapping_add(epoch as u64));
            }

            let mut sumloss = 0.0;
            for _ in 0..n_samples {
                let sample = dataset.next();
                if mask[sample.index] {
                    continue;
                }
                let p = weights.dot(sample.indices, sample.values) + intercept;
                let eta = scheduler.eta_for_sample();
                let sample_loss = loss.loss(p, sample.label);
                sumloss += sample_loss;

                let residual = match secure.exchange(epoch, sample.index as u64, p).await? {
                    Some(residual) => residual,
                    None => continue,
                };

                let mut update = if passive_aggressive {
                    passive_aggressive_step(&settings, sample.values, sample_loss, residual)
                } else {
                    -eta * residual.max(-MAX_DLOSS).min(MAX_DLOSS)
                };
                update *= settings.class_weight.of(sample.label) * sample.weight;

                if penalty.has_l2() {
                    weights.scale(penalty.l2_factor(l1_ratio, eta, alpha));
                }
                if update != 0.0 {
                    weights.add(sample.indices, sample.values, update);
                }
                if settings.fit_intercept {
                    let mut intercept_update = update;
                    if settings.one_class {
                        intercept_update -= 2.0 * eta * alpha;
                    }
                    if intercept_update != 0.0 {
                        intercept += intercept_update * settings.intercept_decay;
                    }
                }

                let t = scheduler.t();
                if settings.average > 0 && settings.average as f64 <= t {
                    let correction = t - settings.average as f64 + 1.0;
                    weights.add_average(sample.indices, sample.values, update, correction);
                    average_intercept += (intercept - average_intercept) / correction;
                    averaging_started = true;
                }

                if let Some(l1) = l1.as_mut() {
                    l1.apply(&mut weights, sample.indices, l1_ratio, eta, alpha);
                }
                scheduler.tick();
            }
            epochs = epoch + 1;

            let average_loss = if train_count > 0 {
                sumloss / train_count as f64
            } else {
                0.0
            };
            if settings.verbose > 0 {
                info!(
                    "epoch {}: norm {:.6}, nnz {}, bias {:.6}, t {}, avg. loss {:.6}",
                    epochs,
                    weights.norm(),
                    weights.nnz(),
                    intercept,
                    scheduler.t() - 1.0,
                    average_loss
                );
            } else {
                debug!(
                    "epoch {}: norm {:.6}, nnz {}, bias {:.6}, t {}, avg. loss {:.6}",
                    epochs,
                    weights.norm(),
                    weights.nnz(),
                    intercept,
                    scheduler.t() - 1.0,
                    average_loss
                );
            }

            if !(weights.is_finite() && intercept.is_finite() && average_intercept.is_finite()) {
                monitor.diverge();
                warn!("weights diverged in epoch {}", epochs);
                return Err(FitError::Diverged { epoch: epochs });
            }

            let value = match scorer.as_mut() {
                Some(score_fn) if settings.early_stopping => {
                    let score = if averaging_started {
                        let average = weights.average().unwrap_or_else(|| weights.logical());
                        score_fn(&average, average_intercept)
                    } else {
                        score_fn(&weights.logical(), intercept)
                    };
                    debug!("validation score {:.6}", score);
                    score
                }
                _ => sumloss,
            };

            if monitor.observe(value) == MonitorState::Converged {
                if scheduler.decay() {
                    debug!("decaying learning rate to {}", scheduler.eta());
                    monitor.rearm();
                } else if scheduler.policy() == LearningRate::Adaptive {
                    termination = Termination::LearningRateFloor;
                    break;
                } else {
                    termination = Termination::Converged;
                    break;
                }
            }
        }

        if termination == Termination::MaxIter && settings.tol.is_some() {
            warn!(
                "maximum number of epochs {} reached before convergence, consider increasing max_iter",
                settings.max_iter
            );
        }
        info!("fit finished after {} epochs: {}", epochs, termination);

        let skipped_samples = secure.skipped();
        let (weights, average_weights) = weights.into_parts();
        let (average_weights, average_intercept) = if averaging_started {
            (average_weights, Some(average_intercept))
        } else {
            (None, None)
        };
        Ok(FitOutcome {
            weights,
            intercept,
            average_weights,
            average_intercept,
            epochs,
            t: scheduler.t(),
            termination,
            skipped_samples,
        })
    }
}

/// Checks the settings and the shapes of the inputs before any message is exchanged.
fn check_inputs<D>(
    settings: &SgdSettings,
    initial: &InitialModel,
    validation: Option<&Validation>,
    dataset: &D,
) -> Result<(), FitError>
where
    D: Dataset,
{
    settings.validate()?;

    let n_samples = dataset.sample_count();
    if n_samples == 0 {
        return Err(FitError::EmptyDataset);
    }
    let n_features = dataset.n_features();
    if initial.weights.len() != n_features {
        return Err(FitError::ShapeMismatch {
            what: "weights",
            expected: n_features,
            actual: initial.weights.len(),
        });
    }
    if let Some(average) = initial.average_weights.as_ref() {
        if average.len() != n_features {
            return Err(FitError::ShapeMismatch {
                what: "average weights",
                expected: n_features,
                actual: average.len(),
            });
        }
    }

    match validation {
        Some(Validation { mask, .. }) if mask.len() != n_samples => Err(FitError::ValidationMask {
            expected: n_samples,
            actual: mask.len(),
        }),
        None if settings.early_stopping => Err(FitError::MissingScorer),
        _ => Ok(()),
    }
}

/// Computes the passive-aggressive update of a sample.
///
/// The step follows from the sample's loss and squared norm, the direction is opposite to the
/// residual. Samples with a zero norm are not updated by PA-I.
fn passive_aggressive_step(settings: &SgdSettings, values: &[f64], loss: f64, residual: f64) -> f64 {
    if residual == 0.0 || loss == 0.0 {
        return 0.0;
    }
    let norm: f64 = values.iter().map(|value| value * value).sum();
    let step = match settings.learning_rate {
        LearningRate::Pa1 if norm == 0.0 => return 0.0,
        LearningRate::Pa1 => settings.c.min(loss / norm),
        _ => loss / (norm + 0.5 / settings.c),
    };
    -step * residual.signum()
}
