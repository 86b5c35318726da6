//! Held out validation samples for early stopping.

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::dataset::{Dataset, SparseDataset};

/// Scores the weights and intercept of the model on held out samples. Larger is better.
pub type Scorer = Box<dyn FnMut(&[f64], f64) -> f64 + Send>;

/// Selects `ceil(fraction * n_samples)` samples for validation, at least one and at most all
/// but one.
pub fn validation_mask(n_samples: usize, fraction: f64, seed: u64) -> Vec<bool> {
    let mut mask = vec![false; n_samples];
    if n_samples < 2 {
        return mask;
    }
    let n_validation = ((fraction * n_samples as f64).ceil() as usize).clamp(1, n_samples - 1);
    let mut order: Vec<usize> = (0..n_samples).collect();
    order.shuffle(&mut ChaCha20Rng::seed_from_u64(seed));
    for &index in &order[..n_validation] {
        mask[index] = true;
    }
    mask
}

/// Creates a scorer on the masked samples of the dataset.
///
/// Classifiers are scored by their accuracy, regressors by the coefficient of determination.
pub fn scorer(dataset: &SparseDataset, mask: &[bool], classification: bool) -> Scorer {
    let samples: Vec<(Vec<usize>, Vec<f64>, f64)> = (0..dataset.sample_count())
        .filter(|index| mask.get(*index).copied().unwrap_or(false))
        .map(|index| {
            let sample = dataset.sample(index);
            (sample.indices.to_vec(), sample.values.to_vec(), sample.label)
        })
        .collect();

    Box::new(move |weights: &[f64], intercept: f64| {
        let predictions = samples.iter().map(|(indices, values, label)| {
            let p: f64 = indices
                .iter()
                .zip(values)
                .map(|(idx, value)| weights[*idx] * value)
                .sum();
            (p + intercept, *label)
        });
        if classification {
            accuracy(predictions)
        } else {
            r2(predictions)
        }
    })
}

fn accuracy(predictions: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (hits, total) = predictions.fold((0_usize, 0_usize), |(hits, total), (p, y)| {
        let hit = (p > 0.0) == (y > 0.0);
        (hits + hit as usize, total + 1)
    });
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn r2(predictions: impl Iterator<Item = (f64, f64)>) -> f64 {
    let predictions: Vec<(f64, f64)> = predictions.collect();
    if predictions.is_empty() {
        return 0.0;
    }
    let mean = predictions.iter().map(|(_, y)| y).sum::<f64>() / predictions.len() as f64;
    let ss_res: f64 = predictions.iter().map(|(p, y)| (y - p) * (y - p)).sum();
    let ss_tot: f64 = predictions.iter().map(|(_, y)| (y - mean) * (y - mean)).sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}
