//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `XAYNET_`, nested sections being separated by `__`, e.g. `XAYNET_SGD__ALPHA=0.001`.

use std::{fmt, path::Path, time::Duration};

use config::{Config, ConfigError, Environment};
use derive_more::Display;
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    loss::LossKind,
    secure::{ExchangeFailurePolicy, ExchangeSettings},
    session::SessionId,
    sgd::{penalty::Penalty, schedule::LearningRate},
};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings of the host binary.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub sgd: SgdSettings,
    pub session: SessionSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("xaynet").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
/// Weights multiplying the update of samples by their class.
pub struct ClassWeight {
    /// The weight of samples with a positive label.
    pub positive: f64,
    /// The weight of all other samples.
    pub negative: f64,
}

impl Default for ClassWeight {
    fn default() -> Self {
        Self {
            positive: 1.0,
            negative: 1.0,
        }
    }
}

impl ClassWeight {
    /// Gets the weight of a sample with the given label.
    pub fn of(&self, label: f64) -> f64 {
        if label > 0.0 {
            self.positive
        } else {
            self.negative
        }
    }
}

#[derive(Debug, Deserialize, Validate, Clone, PartialEq)]
#[validate(schema(function = "validate_sgd"))]
#[serde(default)]
/// The hyperparameters of a fit.
///
/// Every field has a default, so a configuration only needs to name what it changes.
///
/// **TOML**
/// ```text
/// [sgd]
/// penalty = "elastic_net"
/// alpha = 0.0001
/// l1_ratio = 0.15
/// learning_rate = "invscaling"
/// eta0 = 0.01
///
/// [sgd.loss]
/// type = "huber"
/// c = 1.35
/// ```
pub struct SgdSettings {
    /// The loss function. Defaults to the hinge loss with threshold `1`.
    pub loss: LossKind,
    /// The regularization penalty. Defaults to `l2`.
    pub penalty: Penalty,
    /// The regularization strength. Also used by the optimal learning rate.
    pub alpha: f64,
    /// The maximum step of the passive-aggressive learning rates.
    pub c: f64,
    /// The ElasticNet mixing ratio between `0` (pure L2) and `1` (pure L1).
    pub l1_ratio: f64,
    pub fit_intercept: bool,
    /// Multiplies every intercept update. Used to damp the intercept on sparse data.
    pub intercept_decay: f64,
    /// The maximum number of epochs.
    pub max_iter: u32,
    /// The tolerance of the convergence check. `None` runs all `max_iter` epochs.
    pub tol: Option<f64>,
    /// Checks convergence on a held out validation score instead of the training loss.
    pub early_stopping: bool,
    /// The fraction of samples held out for validation by the host binary.
    pub validation_fraction: f64,
    /// The number of epochs without progress before the fit stops.
    pub n_iter_no_change: u32,
    /// Values above `0` log a summary of every epoch at the info level.
    pub verbose: u8,
    /// Shuffles the samples before every epoch.
    pub shuffle: bool,
    /// The seed of the shuffling. Epoch `e` is shuffled with `seed + e`.
    pub seed: u64,
    pub class_weight: ClassWeight,
    pub learning_rate: LearningRate,
    /// The initial learning rate of the `constant`, `invscaling` and `adaptive` policies.
    pub eta0: f64,
    /// The exponent of the `invscaling` policy.
    pub power_t: f64,
    /// Fits a one-class model, which pulls the intercept towards the data.
    pub one_class: bool,
    /// Starts averaging the weights after this many samples. `0` disables averaging, `1` averages
    /// from the first sample on.
    pub average: u64,
}

impl Default for SgdSettings {
    fn default() -> Self {
        Self {
            loss: LossKind::default(),
            penalty: Penalty::default(),
            alpha: 1e-4,
            c: 1.0,
            l1_ratio: 0.15,
            fit_intercept: true,
            intercept_decay: 1.0,
            max_iter: 1000,
            tol: Some(1e-3),
            early_stopping: false,
            validation_fraction: 0.1,
            n_iter_no_change: 5,
            verbose: 0,
            shuffle: true,
            seed: 0,
            class_weight: ClassWeight::default(),
            learning_rate: LearningRate::default(),
            eta0: 0.0,
            power_t: 0.5,
            one_class: false,
            average: 0,
        }
    }
}

impl SgdSettings {
    /// Checks the hyperparameters.
    fn validate_sgd(&self) -> Result<(), ValidationError> {
        self.validate_penalty()?;
        self.validate_learning_rate()?;
        self.validate_stopping()?;
        self.validate_weights()
    }

    fn validate_penalty(&self) -> Result<(), ValidationError> {
        if !(0. ..=1.).contains(&self.l1_ratio) {
            return Err(ValidationError::new("l1_ratio must be in [0, 1]"));
        }
        if !(self.alpha >= 0. && self.alpha.is_finite()) {
            return Err(ValidationError::new("alpha must be finite and non-negative"));
        }
        Ok(())
    }

    fn validate_learning_rate(&self) -> Result<(), ValidationError> {
        if self.learning_rate == LearningRate::Optimal && self.alpha <= 0. {
            return Err(ValidationError::new(
                "alpha must be positive for the optimal learning rate",
            ));
        }
        if self.learning_rate.uses_eta0() && !(self.eta0 > 0. && self.eta0.is_finite()) {
            return Err(ValidationError::new("eta0 must be positive"));
        }
        if self.learning_rate.is_passive_aggressive() && !(self.c > 0. && self.c.is_finite()) {
            return Err(ValidationError::new("c must be positive"));
        }
        if !self.power_t.is_finite() {
            return Err(ValidationError::new("power_t must be finite"));
        }
        Ok(())
    }

    fn validate_stopping(&self) -> Result<(), ValidationError> {
        if self.max_iter < 1 {
            return Err(ValidationError::new("max_iter must be at least 1"));
        }
        if self.n_iter_no_change < 1 {
            return Err(ValidationError::new("n_iter_no_change must be at least 1"));
        }
        if self.tol.map_or(false, |tol| !tol.is_finite()) {
            return Err(ValidationError::new("tol must be finite"));
        }
        if self.early_stopping && !(0. < self.validation_fraction && self.validation_fraction < 1.)
        {
            return Err(ValidationError::new(
                "validation_fraction must be in (0, 1)",
            ));
        }
        Ok(())
    }

    fn validate_weights(&self) -> Result<(), ValidationError> {
        let ClassWeight { positive, negative } = self.class_weight;
        if positive >= 0. && negative >= 0. && positive.is_finite() && negative.is_finite() {
            if self.intercept_decay.is_finite() {
                Ok(())
            } else {
                Err(ValidationError::new("intercept_decay must be finite"))
            }
        } else {
            Err(ValidationError::new(
                "class weights must be finite and non-negative",
            ))
        }
    }
}

/// A wrapper for validate derive.
fn validate_sgd(s: &SgdSettings) -> Result<(), ValidationError> {
    s.validate_sgd()
}

#[derive(Debug, Display, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// The cipher suite of the exchange.
pub enum Encryption {
    #[display(fmt = "plaintext")]
    Plaintext,
    #[display(fmt = "sealed")]
    Sealed,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
/// Settings of the exchange with the guest.
///
/// **TOML**
/// ```text
/// [session]
/// id = 1
/// encryption = "sealed"
/// exchange_timeout_ms = 5000
/// on_exchange_failure = "skip"
/// ```
pub struct SessionSettings {
    /// The namespace of the fit's messages.
    pub id: u32,
    pub encryption: Encryption,
    /// How long to wait for each guest message. Waits forever if left out.
    #[serde(default)]
    pub exchange_timeout_ms: Option<u64>,
    /// What to do with samples whose residual can't be obtained.
    #[serde(default)]
    pub on_exchange_failure: ExchangeFailurePolicy,
}

impl SessionSettings {
    pub fn session_id(&self) -> SessionId {
        SessionId::from(self.id)
    }

    pub fn exchange(&self) -> ExchangeSettings {
        ExchangeSettings {
            policy: self.on_exchange_failure,
            timeout: self.exchange_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// XAYNET_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
