//! Training data.
//!
//! The trainer pulls samples one at a time from a [`Dataset`]. [`SparseDataset`] is an in-memory
//! implementation storing the features in compressed sparse rows.
//!
//! ```
//! # use xaynet_vfl::dataset::{Dataset, SparseDataset};
//! let mut data = SparseDataset::from_dense(&[vec![0.0, 1.5], vec![2.0, 0.0]], vec![1.0, -1.0]).unwrap();
//! let sample = data.next();
//! assert_eq!((sample.index, sample.indices, sample.values), (0, &[1_usize][..], &[1.5][..]));
//! ```

use std::io::BufRead;

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
/// A single training sample.
pub struct Sample<'a> {
    /// The position of the sample in the dataset, independent of the shuffling.
    pub index: usize,
    /// The indices of the non-zero features.
    pub indices: &'a [usize],
    /// The values of the non-zero features.
    pub values: &'a [f64],
    pub label: f64,
    pub weight: f64,
}

/// A source of samples, cycled through epoch after epoch.
pub trait Dataset {
    /// Gets the number of samples.
    fn sample_count(&self) -> usize;

    /// Gets the number of features.
    fn n_features(&self) -> usize;

    /// Gets the next sample. Wraps around to the first sample after the last one.
    fn next(&mut self) -> Sample<'_>;

    /// Permutes the order of the samples deterministically and restarts from the first one.
    fn shuffle(&mut self, seed: u64);
}

#[derive(Debug, Error, PartialEq)]
/// Errors when building a dataset.
pub enum DatasetError {
    #[error("{what} has {actual} entries, expected {expected}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("row {row} has {features} features, expected {expected}")]
    RaggedRow {
        row: usize,
        features: usize,
        expected: usize,
    },
    #[error("feature index {index} of row {row} is out of range")]
    FeatureIndex { row: usize, index: usize },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("failed to read: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq)]
/// An in-memory dataset in compressed sparse row format.
pub struct SparseDataset {
    n_features: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
    labels: Vec<f64>,
    weights: Vec<f64>,
    order: Vec<usize>,
    cursor: usize,
}

impl SparseDataset {
    /// Creates a dataset from dense rows. Zero entries are dropped.
    ///
    /// # Errors
    /// Fails if the rows differ in length or the number of labels doesn't match.
    pub fn from_dense(rows: &[Vec<f64>], labels: Vec<f64>) -> Result<Self, DatasetError> {
        let n_features = rows.first().map_or(0, Vec::len);
        let mut sparse = Vec::with_capacity(rows.len());
        for (row, dense) in rows.iter().enumerate() {
            if dense.len() != n_features {
                return Err(DatasetError::RaggedRow {
                    row,
                    features: dense.len(),
                    expected: n_features,
                });
            }
            sparse.push(
                dense
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| **value != 0.0)
                    .map(|(idx, value)| (idx, *value))
                    .collect(),
            );
        }
        Self::from_rows(n_features, sparse, labels)
    }

    /// Creates a dataset from sparse rows of `(feature index, value)` pairs.
    ///
    /// # Errors
    /// Fails if a feature index is out of range or the number of labels doesn't match.
    pub fn from_rows(
        n_features: usize,
        rows: Vec<Vec<(usize, f64)>>,
        labels: Vec<f64>,
    ) -> Result<Self, DatasetError> {
        if labels.len() != rows.len() {
            return Err(DatasetError::Length {
                what: "labels",
                expected: rows.len(),
                actual: labels.len(),
            });
        }

        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for (row, entries) in rows.into_iter().enumerate() {
            for (index, value) in entries {
                if index >= n_features {
                    return Err(DatasetError::FeatureIndex { row, index });
                }
                indices.push(index);
                values.push(value);
            }
            indptr.push(indices.len());
        }

        let n_samples = labels.len();
        Ok(Self {
            n_features,
            indptr,
            indices,
            values,
            labels,
            weights: vec![1.0; n_samples],
            order: (0..n_samples).collect(),
            cursor: 0,
        })
    }

    /// Sets per-sample weights.
    ///
    /// # Errors
    /// Fails if the number of weights doesn't match the number of samples.
    pub fn with_sample_weights(mut self, weights: Vec<f64>) -> Result<Self, DatasetError> {
        if weights.len() != self.labels.len() {
            return Err(DatasetError::Length {
                what: "sample weights",
                expected: self.labels.len(),
                actual: weights.len(),
            });
        }
        self.weights = weights;
        Ok(self)
    }

    /// Reads a dataset in the LIBSVM text format: `label index:value ...` per line with 1-based
    /// feature indices. Blank lines and lines starting with `#` are ignored.
    ///
    /// The number of features is the largest index seen, unless `n_features` is given.
    ///
    /// # Errors
    /// Fails on malformed lines or if an index exceeds `n_features`.
    pub fn from_libsvm<R>(reader: R, n_features: Option<usize>) -> Result<Self, DatasetError>
    where
        R: BufRead,
    {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        let mut max_index = 0;

        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| DatasetError::Io(err.to_string()))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_error = |reason: String| DatasetError::Parse {
                line: number + 1,
                reason,
            };

            let mut tokens = line.split_whitespace();
            let label = tokens
                .next()
                .and_then(|token| token.parse::<f64>().ok())
                .ok_or_else(|| parse_error("missing or invalid label".into()))?;

            let mut row = Vec::new();
            for token in tokens {
                let (index, value) = parse_feature(token).map_err(parse_error)?;
                max_index = max_index.max(index);
                row.push((index - 1, value));
            }
            rows.push(row);
            labels.push(label);
        }

        let n_features = n_features.unwrap_or(max_index);
        Self::from_rows(n_features, rows, labels)
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// Gets the sample at its position in the dataset.
    pub fn sample(&self, index: usize) -> Sample<'_> {
        let (start, end) = (self.indptr[index], self.indptr[index + 1]);
        Sample {
            index,
            indices: &self.indices[start..end],
            values: &self.values[start..end],
            label: self.labels[index],
            weight: self.weights[index],
        }
    }
}

fn parse_feature(token: &str) -> Result<(usize, f64), String> {
    let mut parts = token.splitn(2, ':');
    let index = parts
        .next()
        .and_then(|index| index.parse::<usize>().ok())
        .filter(|index| *index >= 1)
        .ok_or_else(|| format!("invalid feature index in `{}`", token))?;
    let value = parts
        .next()
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or_else(|| format!("invalid feature value in `{}`", token))?;
    Ok((index, value))
}

impl Dataset for SparseDataset {
    fn sample_count(&self) -> usize {
        self.labels.len()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn next(&mut self) -> Sample<'_> {
        let index = self.order[self.cursor];
        self.cursor = (self.cursor + 1) % self.order.len();
        self.sample(index)
    }

    fn shuffle(&mut self, seed: u64) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        self.order.shuffle(&mut rng);
        self.cursor = 0;
    }
}
