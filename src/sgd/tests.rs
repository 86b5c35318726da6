use std::sync::Arc;

use super::*;
use crate::{
    crypto::{CryptoError, Plaintext, SealedScalar},
    dataset::SparseDataset,
    loss::LossKind,
    secure::ExchangeFailurePolicy,
    session::{pair, Channel, LocalGuest, MemoryTransfer, Role, SessionId, Slot},
    settings::{ClassWeight, SgdSettings},
    sgd::{cancel::cancellation, penalty::Penalty},
};

fn rows() -> Vec<Vec<f64>> {
    vec![
        vec![0.5, -1.2, 0.0, 2.0],
        vec![-0.3, 0.8, 1.5, 0.0],
        vec![1.1, 0.0, -0.7, 0.4],
        vec![0.0, -0.6, 0.9, -1.3],
        vec![0.7, 0.3, 0.0, 1.8],
        vec![-1.4, 0.5, 0.2, 0.0],
        vec![0.9, -0.4, -1.1, 0.6],
        vec![-0.2, 1.3, 0.6, -0.9],
    ]
}

fn labels() -> Vec<f64> {
    vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]
}

fn dataset() -> SparseDataset {
    SparseDataset::from_dense(&rows(), labels()).unwrap()
}

/// Constant learning rate, no convergence check and no shuffling.
fn plain_settings() -> SgdSettings {
    SgdSettings {
        learning_rate: LearningRate::Constant,
        eta0: 0.01,
        alpha: 1e-4,
        tol: None,
        shuffle: false,
        max_iter: 50,
        ..SgdSettings::default()
    }
}

fn trainer<C>(settings: SgdSettings, suite: C, host: MemoryTransfer) -> Trainer<C, MemoryTransfer>
where
    C: CipherSuite,
{
    Trainer::new(settings, suite, Session::new(SessionId::from(1), host))
}

/// Runs the fit against a guest serving the other end of the transport.
async fn fit_with_guest<C>(
    trainer: Trainer<C, MemoryTransfer>,
    guest: LocalGuest<C>,
    guest_end: MemoryTransfer,
    initial: InitialModel,
    dataset: &mut SparseDataset,
) -> Result<FitOutcome, FitError>
where
    C: CipherSuite + 'static,
{
    let guest = tokio::spawn(guest.serve(guest_end));
    let outcome = trainer.fit(initial, dataset).await;
    // the guest stops once the host hung up
    let _ = guest.await.unwrap();
    outcome
}

fn labels_guest(loss: LossKind) -> LocalGuest<Plaintext> {
    LocalGuest::with_labels(Plaintext, loss, labels())
}

fn silent_guest<C>(suite: C) -> LocalGuest<C>
where
    C: CipherSuite,
{
    LocalGuest::new(suite, Box::new(|_, _| 0.0))
}

/// Plain dense SGD with the hinge loss and L2 penalty.
fn dense_reference(eta: f64, alpha: f64, epochs: usize) -> (Vec<f64>, f64) {
    let mut w = vec![0.0; 4];
    let mut b = 0.0;
    for _ in 0..epochs {
        for (x, y) in rows().iter().zip(labels()) {
            let p: f64 = w.iter().zip(x).map(|(w, x)| w * x).sum::<f64>() + b;
            let dloss = if p * y <= 1.0 { -y } else { 0.0 };
            let update = -eta * dloss;
            for (w, x) in w.iter_mut().zip(x) {
                *w = *w * (1.0 - eta * alpha) + update * x;
            }
            b += update;
        }
    }
    (w, b)
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "index {}: {} != {}", i, a, e);
    }
}

#[tokio::test]
async fn test_matches_dense_reference() {
    let (host, guest) = pair(SessionId::from(1));
    let mut data = dataset();
    let outcome = fit_with_guest(
        trainer(plain_settings(), Plaintext, host),
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut data,
    )
    .await
    .unwrap();

    let (weights, intercept) = dense_reference(0.01, 1e-4, 50);
    assert_close(&outcome.weights, &weights, 1e-9);
    assert!((outcome.intercept - intercept).abs() <= 1e-9);
    assert_eq!(outcome.epochs, 50);
    assert_eq!(outcome.t, 401.0);
    assert_eq!(outcome.termination, Termination::MaxIter);
    assert_eq!(outcome.skipped_samples, 0);
    assert_eq!(outcome.average_weights, None);
}

#[tokio::test]
async fn test_sealed_exchange_matches_plaintext() {
    let settings = SgdSettings {
        max_iter: 5,
        shuffle: true,
        seed: 11,
        ..plain_settings()
    };

    let (host, guest) = pair(SessionId::from(1));
    let plain = fit_with_guest(
        trainer(settings.clone(), Plaintext, host),
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();

    let suite = SealedScalar::new().unwrap();
    let (host, guest) = pair(SessionId::from(1));
    let sealed = fit_with_guest(
        trainer(settings, suite, host),
        LocalGuest::with_labels(suite, LossKind::Hinge { threshold: 1.0 }, labels()),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();

    assert_eq!(plain, sealed);
}

#[tokio::test]
async fn test_zero_residual_only_shrinks() {
    let settings = SgdSettings {
        eta0: 0.1,
        alpha: 0.01,
        max_iter: 5,
        shuffle: true,
        ..plain_settings()
    };
    let initial = InitialModel {
        weights: vec![1.0, -2.0, 0.5, 3.0],
        intercept: 0.25,
        ..InitialModel::zeros(4)
    };
    let factor = (1.0_f64 - 0.1 * 0.01).powi(40);
    let expected: Vec<f64> = initial.weights.iter().map(|w| w * factor).collect();

    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings.clone(), Plaintext, host),
        silent_guest(Plaintext),
        guest,
        initial.clone(),
        &mut dataset(),
    )
    .await
    .unwrap();
    assert_close(&outcome.weights, &expected, 1e-12);
    assert_eq!(outcome.intercept, 0.25);

    let suite = SealedScalar::new().unwrap();
    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings, suite, host),
        silent_guest(suite),
        guest,
        initial,
        &mut dataset(),
    )
    .await
    .unwrap();
    assert_close(&outcome.weights, &expected, 1e-12);
    assert_eq!(outcome.intercept, 0.25);
}

fn scripted_scorer(scores: Vec<f64>) -> Scorer {
    let mut calls = 0;
    Box::new(move |_: &[f64], _: f64| {
        let score = scores[calls.min(scores.len() - 1)];
        calls += 1;
        score
    })
}

fn last_held_out() -> Vec<bool> {
    let mut mask = vec![false; 8];
    mask[7] = true;
    mask
}

#[tokio::test]
async fn test_early_stopping_on_plateau() {
    let settings = SgdSettings {
        early_stopping: true,
        tol: Some(0.0),
        n_iter_no_change: 3,
        max_iter: 100,
        ..plain_settings()
    };
    let (host, guest) = pair(SessionId::from(1));
    let trainer = trainer(settings, Plaintext, host).with_validation(
        last_held_out(),
        scripted_scorer(vec![0.5, 0.6, 0.7, 0.7, 0.7, 0.7, 0.7]),
    );
    let outcome = fit_with_guest(
        trainer,
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.termination, Termination::Converged);
    assert_eq!(outcome.epochs, 6);
    // seven training samples per epoch
    assert_eq!(outcome.t, 43.0);
}

#[tokio::test]
async fn test_adaptive_decays_until_floor() {
    let settings = SgdSettings {
        learning_rate: LearningRate::Adaptive,
        eta0: 4e-6,
        early_stopping: true,
        tol: Some(0.0),
        n_iter_no_change: 1,
        max_iter: 100,
        ..plain_settings()
    };
    let (host, guest) = pair(SessionId::from(1));
    let trainer = trainer(settings, Plaintext, host)
        .with_validation(last_held_out(), scripted_scorer(vec![0.5]));
    let outcome = fit_with_guest(
        trainer,
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.termination, Termination::LearningRateFloor);
    assert_eq!(outcome.epochs, 4);
}

#[tokio::test]
async fn test_training_loss_convergence() {
    let settings = SgdSettings {
        tol: Some(1e3),
        n_iter_no_change: 1,
        ..plain_settings()
    };
    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings, Plaintext, host),
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.termination, Termination::Converged);
    assert_eq!(outcome.epochs, 2);
}

#[tokio::test]
async fn test_divergence_is_fatal() {
    let settings = SgdSettings {
        loss: LossKind::SquaredLoss,
        penalty: Penalty::None,
        fit_intercept: false,
        max_iter: 5,
        ..plain_settings()
    };
    let mut data = SparseDataset::from_dense(&[vec![1e300], vec![1e300]], vec![1.0, 1.0]).unwrap();
    let (host, guest) = pair(SessionId::from(1));
    let result = fit_with_guest(
        trainer(settings, Plaintext, host),
        LocalGuest::with_labels(Plaintext, LossKind::SquaredLoss, vec![1.0, 1.0]),
        guest,
        InitialModel::zeros(1),
        &mut data,
    )
    .await;
    // epochs are counted from 1, like in the epoch summaries
    assert!(matches!(result, Err(FitError::Diverged { epoch: 1 })));
    assert!(result.unwrap_err().to_string().contains("at epoch 1,"));
}

#[tokio::test]
async fn test_cancellation_at_epoch_boundary() {
    let settings = SgdSettings {
        early_stopping: true,
        max_iter: 100,
        ..plain_settings()
    };
    let (canceller, cancelled) = cancellation();
    let mut calls = 0;
    let scorer = Box::new(move |_: &[f64], _: f64| {
        calls += 1;
        if calls == 2 {
            canceller.cancel();
        }
        0.5
    });
    let (host, guest) = pair(SessionId::from(1));
    let trainer = trainer(settings, Plaintext, host)
        .with_validation(last_held_out(), scorer)
        .with_cancellation(cancelled);
    let outcome = fit_with_guest(
        trainer,
        labels_guest(LossKind::Hinge { threshold: 1.0 }),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.termination, Termination::Cancelled);
    assert_eq!(outcome.epochs, 2);
    assert!(outcome.weights.iter().any(|w| *w != 0.0));
}

/// Answers every prediction with bytes that are no ciphertext.
async fn garbage_guest(mut transfer: MemoryTransfer) {
    while let Some((slot, _)) = transfer.next_envelope().await {
        if slot.channel != Channel::HostPrediction {
            continue;
        }
        let answer = transfer
            .remote(vec![1, 2, 3], Role::Host, slot.on(Channel::CipherResidual))
            .await;
        if answer.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn test_malformed_residual_aborts() {
    let (host, guest) = pair(SessionId::from(1));
    let guest = tokio::spawn(garbage_guest(guest));
    let result = trainer(plain_settings(), Plaintext, host)
        .with_context(Arc::new(()))
        .fit(InitialModel::zeros(4), &mut dataset())
        .await;
    guest.await.unwrap();
    assert!(matches!(
        result,
        Err(FitError::Exchange(SecureUpdateError::Crypto { .. }))
    ));
}

#[tokio::test]
async fn test_malformed_residual_is_skipped() {
    let settings = SgdSettings {
        max_iter: 3,
        ..plain_settings()
    };
    let initial = InitialModel {
        weights: vec![1.0, -2.0, 0.5, 3.0],
        ..InitialModel::zeros(4)
    };
    let (host, guest) = pair(SessionId::from(1));
    let guest = tokio::spawn(garbage_guest(guest));
    let outcome = trainer(settings, Plaintext, host)
        .with_context(Arc::new(()))
        .with_exchange(ExchangeSettings {
            policy: ExchangeFailurePolicy::Skip,
            timeout: None,
        })
        .fit(initial.clone(), &mut dataset())
        .await
        .unwrap();
    guest.await.unwrap();

    assert_eq!(outcome.weights, initial.weights);
    assert_eq!(outcome.skipped_samples, 24);
    assert_eq!(outcome.t, 1.0);
    assert_eq!(outcome.epochs, 3);
}

#[tokio::test]
async fn test_input_checks() {
    let (host, _guest) = pair(SessionId::from(1));
    let result = trainer(plain_settings(), Plaintext, host)
        .with_validation(vec![false; 3], scripted_scorer(vec![0.0]))
        .fit(InitialModel::zeros(4), &mut dataset())
        .await;
    assert!(matches!(
        result,
        Err(FitError::ValidationMask {
            expected: 8,
            actual: 3
        })
    ));

    let settings = SgdSettings {
        early_stopping: true,
        ..plain_settings()
    };
    let (host, _guest) = pair(SessionId::from(1));
    let result = trainer(settings, Plaintext, host)
        .fit(InitialModel::zeros(4), &mut dataset())
        .await;
    assert!(matches!(result, Err(FitError::MissingScorer)));

    let settings = SgdSettings {
        penalty: Penalty::ElasticNet,
        l1_ratio: 1.5,
        ..plain_settings()
    };
    let (host, _guest) = pair(SessionId::from(1));
    let result = trainer(settings, Plaintext, host)
        .fit(InitialModel::zeros(4), &mut dataset())
        .await;
    assert!(matches!(result, Err(FitError::InvalidSettings(_))));

    let (host, _guest) = pair(SessionId::from(1));
    let result = trainer(plain_settings(), Plaintext, host)
        .fit(InitialModel::zeros(3), &mut dataset())
        .await;
    assert!(matches!(
        result,
        Err(FitError::ShapeMismatch {
            what: "weights",
            expected: 4,
            actual: 3
        })
    ));
}

async fn single_step(learning_rate: LearningRate) -> Vec<f64> {
    let settings = SgdSettings {
        learning_rate,
        c: 1.0,
        penalty: Penalty::None,
        fit_intercept: false,
        max_iter: 1,
        ..plain_settings()
    };
    let mut data = SparseDataset::from_dense(&[vec![2.0, 0.0]], vec![1.0]).unwrap();
    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings, Plaintext, host),
        LocalGuest::with_labels(Plaintext, LossKind::Hinge { threshold: 1.0 }, vec![1.0]),
        guest,
        InitialModel::zeros(2),
        &mut data,
    )
    .await
    .unwrap();
    outcome.weights
}

#[tokio::test]
async fn test_passive_aggressive_steps() {
    // loss 1, squared norm 4
    assert_close(&single_step(LearningRate::Pa1).await, &[0.5, 0.0], 1e-15);
    assert_close(
        &single_step(LearningRate::Pa2).await,
        &[2.0 / 4.5, 0.0],
        1e-15,
    );
}

#[tokio::test]
async fn test_average_of_shrinking_weights() {
    let settings = SgdSettings {
        eta0: 0.1,
        alpha: 0.01,
        max_iter: 2,
        average: 1,
        ..plain_settings()
    };
    let initial = InitialModel {
        weights: vec![1.0, -2.0, 0.5, 3.0],
        intercept: 0.25,
        ..InitialModel::zeros(4)
    };
    let factor = 1.0_f64 - 0.1 * 0.01;
    let mean_factor = (1..=16).map(|k| factor.powi(k)).sum::<f64>() / 16.0;
    let expected: Vec<f64> = initial.weights.iter().map(|w| w * mean_factor).collect();

    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings.clone(), Plaintext, host),
        silent_guest(Plaintext),
        guest,
        initial.clone(),
        &mut dataset(),
    )
    .await
    .unwrap();
    assert_close(&outcome.average_weights.unwrap(), &expected, 1e-12);
    assert_eq!(outcome.average_intercept, Some(0.25));

    let settings = SgdSettings {
        average: 100,
        ..settings
    };
    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings, Plaintext, host),
        silent_guest(Plaintext),
        guest,
        initial,
        &mut dataset(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.average_weights, None);
    assert_eq!(outcome.average_intercept, None);
}

#[tokio::test]
async fn test_warm_start_continues() {
    let fit = |max_iter: u32, initial: InitialModel| async move {
        let settings = SgdSettings {
            max_iter,
            ..plain_settings()
        };
        let (host, guest) = pair(SessionId::from(1));
        fit_with_guest(
            trainer(settings, Plaintext, host),
            labels_guest(LossKind::Hinge { threshold: 1.0 }),
            guest,
            initial,
            &mut dataset(),
        )
        .await
        .unwrap()
    };

    let full = fit(5, InitialModel::zeros(4)).await;
    let first = fit(2, InitialModel::zeros(4)).await;
    let second = fit(3, InitialModel::warm_start(&first)).await;
    assert_close(&second.weights, &full.weights, 1e-12);
    assert!((second.intercept - full.intercept).abs() <= 1e-12);
    assert_eq!(second.t, full.t);
}

#[tokio::test]
async fn test_shuffled_fits_are_reproducible() {
    let settings = SgdSettings {
        shuffle: true,
        seed: 5,
        max_iter: 10,
        ..plain_settings()
    };
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let (host, guest) = pair(SessionId::from(1));
        outcomes.push(
            fit_with_guest(
                trainer(settings.clone(), Plaintext, host),
                labels_guest(LossKind::Log),
                guest,
                InitialModel::zeros(4),
                &mut dataset(),
            )
            .await
            .unwrap(),
        );
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

/// Answers with a non-finite residual for the first sample and zero for all others.
fn nan_guest() -> LocalGuest<Plaintext> {
    LocalGuest::new(
        Plaintext,
        Box::new(|slot: Slot, _: f64| if slot.sample == 0 { f64::NAN } else { 0.0 }),
    )
}

#[tokio::test]
async fn test_non_finite_residual_never_reaches_weights() {
    let settings = SgdSettings {
        max_iter: 1,
        ..plain_settings()
    };
    let initial = InitialModel {
        weights: vec![1.0, -2.0, 0.5, 3.0],
        ..InitialModel::zeros(4)
    };

    let (host, guest) = pair(SessionId::from(1));
    let result = fit_with_guest(
        trainer(settings.clone(), Plaintext, host),
        nan_guest(),
        guest,
        initial.clone(),
        &mut dataset(),
    )
    .await;
    assert!(matches!(
        result,
        Err(FitError::Exchange(SecureUpdateError::Crypto {
            source: CryptoError::Malformed(_),
            ..
        }))
    ));

    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings, Plaintext, host).with_exchange(ExchangeSettings {
            policy: ExchangeFailurePolicy::Skip,
            timeout: None,
        }),
        nan_guest(),
        guest,
        initial.clone(),
        &mut dataset(),
    )
    .await
    .unwrap();
    // the seven remaining samples only shrink the weights
    let factor = (1.0_f64 - 0.01 * 1e-4).powi(7);
    let expected: Vec<f64> = initial.weights.iter().map(|w| w * factor).collect();
    assert_close(&outcome.weights, &expected, 1e-12);
    assert_eq!(outcome.intercept, 0.0);
    assert_eq!(outcome.skipped_samples, 1);
    assert_eq!(outcome.t, 8.0);
}

struct Reference {
    weights: Vec<f64>,
    intercept: f64,
    average_weights: Option<Vec<f64>>,
    average_intercept: Option<f64>,
}

/// Dense SGD over the samples in order, applying every penalty to plain weights right away.
fn eager_reference(settings: &SgdSettings, epochs: u32) -> Reference {
    let n_features = 4;
    let alpha = settings.alpha;
    let l1_ratio = settings.penalty.l1_ratio(settings.l1_ratio);
    let typw = (1.0 / alpha.sqrt()).sqrt();
    let optimal_init = 1.0 / (typw / settings.loss.dloss(-typw, 1.0).max(1.0) * alpha);

    let mut w = vec![0.0; n_features];
    let mut b = 0.0;
    let mut average: Option<(Vec<f64>, f64)> = None;
    let mut u = 0.0;
    let mut q = vec![0.0; n_features];
    let mut t = 1.0;
    for _ in 0..epochs {
        for (x, y) in rows().iter().zip(labels()) {
            let p = w.iter().zip(x).map(|(w, x)| w * x).sum::<f64>() + b;
            let eta = match settings.learning_rate {
                LearningRate::Optimal => 1.0 / (alpha * (optimal_init + t - 1.0)),
                LearningRate::InvScaling => settings.eta0 / f64::powf(t, settings.power_t),
                _ => settings.eta0,
            };
            let update = -eta * settings.loss.dloss(p, y) * settings.class_weight.of(y);

            if settings.penalty.has_l2() {
                let shrink = (1.0 - (1.0 - l1_ratio) * eta * alpha).max(0.0);
                w.iter_mut().for_each(|w| *w *= shrink);
            }
            for (w, x) in w.iter_mut().zip(x) {
                *w += update * x;
            }
            if settings.fit_intercept {
                let mut intercept_update = update;
                if settings.one_class {
                    intercept_update -= 2.0 * eta * alpha;
                }
                b += intercept_update * settings.intercept_decay;
            }

            if settings.average > 0 && settings.average as f64 <= t {
                let correction = t - settings.average as f64 + 1.0;
                let (avg, avg_b) = average.get_or_insert_with(|| (vec![0.0; n_features], 0.0));
                for (avg, w) in avg.iter_mut().zip(&w) {
                    *avg += (w - *avg) / correction;
                }
                *avg_b += (b - *avg_b) / correction;
            }

            if settings.penalty.has_l1() {
                u += l1_ratio * eta * alpha;
                for j in (0..n_features).filter(|j| x[*j] != 0.0) {
                    let z = w[j];
                    if z > 0.0 {
                        w[j] = (w[j] - (u + q[j])).max(0.0);
                    } else if z < 0.0 {
                        w[j] = (w[j] + (u - q[j])).min(0.0);
                    }
                    q[j] += w[j] - z;
                }
            }
            t += 1.0;
        }
    }

    let (average_weights, average_intercept) = match average {
        Some((avg, avg_b)) => (Some(avg), Some(avg_b)),
        None => (None, None),
    };
    Reference {
        weights: w,
        intercept: b,
        average_weights,
        average_intercept,
    }
}

fn assert_relative(actual: &[f64], expected: &[f64]) {
    let scaled: Vec<f64> = expected.iter().map(|e| e.abs().max(1.0) * 1e-9).collect();
    assert_eq!(actual.len(), expected.len());
    for (i, ((a, e), tol)) in actual.iter().zip(expected).zip(scaled).enumerate() {
        assert!((a - e).abs() <= tol, "index {}: {} != {}", i, a, e);
    }
}

async fn fit_against_reference(settings: SgdSettings) -> (FitOutcome, Reference) {
    let reference = eager_reference(&settings, settings.max_iter);
    let (host, guest) = pair(SessionId::from(1));
    let outcome = fit_with_guest(
        trainer(settings.clone(), Plaintext, host),
        labels_guest(settings.loss),
        guest,
        InitialModel::zeros(4),
        &mut dataset(),
    )
    .await
    .unwrap();
    (outcome, reference)
}

#[tokio::test]
async fn test_l1_penalties_match_eager_reference() {
    for &penalty in [Penalty::L1, Penalty::ElasticNet].iter() {
        let settings = SgdSettings {
            loss: LossKind::Hinge { threshold: 1.0 },
            penalty,
            l1_ratio: 0.4,
            alpha: 0.05,
            eta0: 0.05,
            max_iter: 20,
            ..plain_settings()
        };
        let (outcome, reference) = fit_against_reference(settings).await;
        assert_relative(&outcome.weights, &reference.weights);
        assert_relative(&[outcome.intercept], &[reference.intercept]);
    }
}

#[tokio::test]
async fn test_elastic_net_average_matches_eager_reference() {
    let settings = SgdSettings {
        loss: LossKind::Log,
        penalty: Penalty::ElasticNet,
        l1_ratio: 0.5,
        alpha: 0.02,
        eta0: 0.1,
        max_iter: 10,
        average: 5,
        ..plain_settings()
    };
    let (outcome, reference) = fit_against_reference(settings).await;
    assert_relative(&outcome.weights, &reference.weights);
    assert_relative(
        &outcome.average_weights.unwrap(),
        &reference.average_weights.unwrap(),
    );
    assert_relative(
        &[outcome.average_intercept.unwrap()],
        &[reference.average_intercept.unwrap()],
    );
}

#[tokio::test]
async fn test_one_class_and_class_weights_match_eager_reference() {
    let settings = SgdSettings {
        loss: LossKind::SquaredHinge { threshold: 1.0 },
        one_class: true,
        intercept_decay: 0.5,
        class_weight: ClassWeight {
            positive: 2.0,
            negative: 0.5,
        },
        alpha: 0.01,
        eta0: 0.02,
        max_iter: 15,
        ..plain_settings()
    };
    let (outcome, reference) = fit_against_reference(settings.clone()).await;
    assert_relative(&outcome.weights, &reference.weights);
    assert_relative(&[outcome.intercept], &[reference.intercept]);

    // the one-class correction alone moves the intercept
    let (unweighted, _) = fit_against_reference(SgdSettings {
        one_class: false,
        ..settings
    })
    .await;
    assert!(unweighted.intercept != outcome.intercept);
}

#[tokio::test]
async fn test_decaying_schedules_match_eager_reference() {
    let optimal = SgdSettings {
        loss: LossKind::Log,
        learning_rate: LearningRate::Optimal,
        alpha: 0.01,
        max_iter: 10,
        ..plain_settings()
    };
    let invscaling = SgdSettings {
        loss: LossKind::ModifiedHuber,
        learning_rate: LearningRate::InvScaling,
        eta0: 0.1,
        power_t: 0.25,
        max_iter: 10,
        ..plain_settings()
    };
    for settings in vec![optimal, invscaling] {
        let (outcome, reference) = fit_against_reference(settings).await;
        assert_relative(&outcome.weights, &reference.weights);
        assert_relative(&[outcome.intercept], &[reference.intercept]);
        assert_eq!(outcome.t, 81.0);
    }
}
