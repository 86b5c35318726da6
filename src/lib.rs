#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/xaynetwork/xaynet/master/assets/logo.png"
)]
//! # Vertically federated linear models
//!
//! In a vertically federated setting two parties hold different features of the same samples.
//! The *host* holds a block of features, the *guest* holds the remaining features. This crate
//! implements the host side of training a linear model with streaming SGD over such a split,
//! without either party sending its raw features to the other. Both parties know the labels: the
//! guest needs them for the residuals, the host for reporting the training loss.
//!
//! For every sample the host sends its partial prediction to the guest. The guest completes the
//! prediction, evaluates the derivative of the loss and answers with that residual, encrypted
//! under the public key of the host. The host decrypts it and updates its weights. Everything
//! else runs locally on the host:
//!
//! - [`loss`]: the convex losses of linear classifiers and regressors.
//! - [`weights`]: lazily scaled weight vectors with running averages.
//! - [`sgd`]: penalties, learning rate schedules, convergence tracking and the [`Trainer`] tying
//!   them together.
//! - [`secure`]: the per-sample exchange with the guest.
//! - [`crypto`], [`session`] and [`dataset`]: the seams to the encryption scheme, the transport
//!   and the training data, each with an in-process implementation.
//! - [`settings`]: the configuration of the `vfl-host` binary.
//!
//! # Example
//! ```
//! # use xaynet_vfl::{
//! #     crypto::Plaintext,
//! #     dataset::{Dataset, SparseDataset},
//! #     loss::LossKind,
//! #     session::{pair, LocalGuest, Session, SessionId},
//! #     settings::SgdSettings,
//! #     sgd::{schedule::LearningRate, InitialModel, Termination, Trainer},
//! # };
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let rows = vec![vec![1.0, 0.5], vec![-1.0, -0.5], vec![0.8, 1.0], vec![-0.9, -1.2]];
//! let labels = vec![1.0, -1.0, 1.0, -1.0];
//! let mut dataset = SparseDataset::from_dense(&rows, labels.clone()).unwrap();
//!
//! // a simulated guest answering with the residuals of the labels
//! let (host, guest_end) = pair(SessionId::from(1));
//! let guest = LocalGuest::with_labels(Plaintext, LossKind::default(), labels);
//! let guest = tokio::spawn(guest.serve(guest_end));
//!
//! let settings = SgdSettings {
//!     learning_rate: LearningRate::Constant,
//!     eta0: 0.1,
//!     max_iter: 20,
//!     tol: None,
//!     ..SgdSettings::default()
//! };
//! let outcome = Trainer::new(settings, Plaintext, Session::new(SessionId::from(1), host))
//!     .fit(InitialModel::zeros(dataset.n_features()), &mut dataset)
//!     .await
//!     .unwrap();
//! guest.await.unwrap().unwrap();
//!
//! assert_eq!(outcome.termination, Termination::MaxIter);
//! assert!(outcome.weights[0] > 0.0);
//! # }
//! ```

pub mod crypto;
pub mod dataset;
pub mod loss;
pub mod secure;
pub mod session;
pub mod settings;
pub mod sgd;
pub mod weights;

pub use self::sgd::{FitError, FitOutcome, InitialModel, Termination, Trainer};
