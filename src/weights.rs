//! Lazily scaled dense weight vectors.
//!
//! The logical weight at index `i` is `wscale * raw[i]`. Multiplicative shrinkage only touches
//! `wscale`, so an L2 step costs `O(1)` instead of `O(n_features)`, while sparse updates only
//! touch the features of the current sample.
//!
//! The running average used for averaged SGD is kept in the same lazy fashion: the logical
//! average is `(avg_raw + avg_a * raw) / avg_b`. Every change of `raw` is compensated in
//! `avg_raw`, so the average only moves when a snapshot is folded in via
//! [`WeightVector::add_average()`].
//!
//! ```
//! # use xaynet_vfl::weights::WeightVector;
//! let mut weights = WeightVector::new(vec![1.0, 2.0, 3.0], None);
//! weights.scale(0.5);
//! assert_eq!(weights.dot(&[0, 2], &[1.0, 1.0]), 2.0);
//! weights.add(&[1], &[2.0], 1.0);
//! assert_eq!(weights.logical(), vec![0.5, 3.0, 1.5]);
//! ```

/// Below this scale the pending scale is folded into the raw weights.
const WSCALE_THRESHOLD: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
struct Average {
    raw: Vec<f64>,
    a: f64,
    b: f64,
}

#[derive(Debug, Clone, PartialEq)]
/// A dense weight vector with a factored out scale and an optional running average.
pub struct WeightVector {
    raw: Vec<f64>,
    wscale: f64,
    average: Option<Average>,
}

#[allow(clippy::len_without_is_empty)]
impl WeightVector {
    /// Creates a weight vector from initial weights.
    ///
    /// If `average` is given, it is the buffer the running average is accumulated in. It must have
    /// the same length as `weights`.
    pub fn new(weights: Vec<f64>, average: Option<Vec<f64>>) -> Self {
        debug_assert!(average
            .as_ref()
            .map_or(true, |avg| avg.len() == weights.len()));
        Self {
            raw: weights,
            wscale: 1.0,
            average: average.map(|raw| Average { raw, a: 0.0, b: 1.0 }),
        }
    }

    /// Gets the number of weights.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Gets the current scale factor.
    pub fn wscale(&self) -> f64 {
        self.wscale
    }

    /// Computes the dot product of the logical weights with a sparse vector.
    pub fn dot(&self, indices: &[usize], values: &[f64]) -> f64 {
        let inner: f64 = indices
            .iter()
            .zip(values)
            .map(|(&idx, &value)| self.raw[idx] * value)
            .sum();
        inner * self.wscale
    }

    /// Multiplies the logical weights by `factor`.
    ///
    /// Materializes the scale if it becomes too small to preserve precision.
    pub fn scale(&mut self, factor: f64) {
        self.wscale *= factor;
        if self.wscale < WSCALE_THRESHOLD {
            self.reset_wscale();
        }
    }

    /// Adds `update * x` to the logical weights, where `x` is the given sparse vector.
    pub fn add(&mut self, indices: &[usize], values: &[f64], update: f64) {
        let step = update / self.wscale;
        for (&idx, &value) in indices.iter().zip(values) {
            self.raw[idx] += value * step;
        }
    }

    /// Folds the current logical weights into the running average.
    ///
    /// Must be called right after the [`add()`] of the same sample with the same `update`, whose
    /// raw changes it compensates. `correction` is the number of averaged iterations including
    /// the current one. The first averaged iteration (`correction <= 1`) restarts the average
    /// from the current weights.
    ///
    /// Does nothing if no average is tracked.
    ///
    /// [`add()`]: WeightVector::add
    pub fn add_average(&mut self, indices: &[usize], values: &[f64], update: f64, correction: f64) {
        let wscale = self.wscale;
        let average = match self.average.as_mut() {
            Some(average) => average,
            None => return,
        };

        if correction <= 1.0 {
            average.raw.iter_mut().for_each(|avg| *avg = 0.0);
            average.a = wscale;
            average.b = 1.0;
            return;
        }

        let step = update / wscale;
        for (&idx, &value) in indices.iter().zip(values) {
            average.raw[idx] -= average.a * value * step;
        }
        let mu = 1.0 / correction;
        average.b /= 1.0 - mu;
        average.a += mu * average.b * wscale;
    }

    /// Shrinks the raw weight at `idx` toward zero by the owed L1 penalty without crossing zero.
    ///
    /// `u` is the total penalty owed per feature so far and `q` the signed penalty already applied
    /// to this feature. Returns the applied change of the logical weight.
    pub(crate) fn l1_truncate(&mut self, idx: usize, u: f64, q: f64) -> f64 {
        let wscale = self.wscale;
        let before = self.raw[idx];
        let logical = wscale * before;
        let after = if logical > 0.0 {
            (before - (u + q) / wscale).max(0.0)
        } else if logical < 0.0 {
            (before + (u - q) / wscale).min(0.0)
        } else {
            before
        };
        self.raw[idx] = after;

        let delta = after - before;
        if let Some(average) = self.average.as_mut() {
            average.raw[idx] -= average.a * delta;
        }
        wscale * delta
    }

    /// Computes the Euclidean norm of the logical weights.
    pub fn norm(&self) -> f64 {
        self.raw.iter().map(|w| w * w).sum::<f64>().sqrt() * self.wscale.abs()
    }

    /// Counts the non-zero weights.
    pub fn nnz(&self) -> usize {
        self.raw.iter().filter(|w| **w != 0.0).count()
    }

    /// Folds the pending scale and the pending averaging scalars into the stored values, leaving
    /// `wscale == 1`.
    pub fn reset_wscale(&mut self) {
        if let Some(average) = self.average.as_mut() {
            let (a, b) = (average.a, average.b);
            for (avg, w) in average.raw.iter_mut().zip(&self.raw) {
                *avg = (*avg + a * w) / b;
            }
            average.a = 0.0;
            average.b = 1.0;
        }
        let wscale = self.wscale;
        self.raw.iter_mut().for_each(|w| *w *= wscale);
        self.wscale = 1.0;
    }

    /// Gets a copy of the logical weights.
    pub fn logical(&self) -> Vec<f64> {
        self.raw.iter().map(|w| w * self.wscale).collect()
    }

    /// Gets a copy of the logical running average, if one is tracked.
    pub fn average(&self) -> Option<Vec<f64>> {
        self.average.as_ref().map(|average| {
            average
                .raw
                .iter()
                .zip(&self.raw)
                .map(|(avg, w)| (avg + average.a * w) / average.b)
                .collect()
        })
    }

    /// Checks whether all logical weights and averages are finite.
    pub fn is_finite(&self) -> bool {
        self.wscale.is_finite()
            && self.raw.iter().all(|w| w.is_finite())
            && self.average.as_ref().map_or(true, |average| {
                average.a.is_finite()
                    && average.b.is_finite()
                    && average.raw.iter().all(|avg| avg.is_finite())
            })
    }

    /// Materializes the weights and returns them together with the running average.
    pub fn into_parts(mut self) -> (Vec<f64>, Option<Vec<f64>>) {
        self.reset_wscale();
        (self.raw, self.average.map(|average| average.raw))
    }
}
