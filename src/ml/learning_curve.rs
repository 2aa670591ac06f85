//! Learning-Curve Generator: train/test accuracy as the training subset grows.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::estimator::Estimator;
use crate::config::TrainingSettings;
use crate::dataset::LabeledDataset;

#[derive(Debug, Clone, PartialEq)]
pub struct LearningCurveOptions {
    /// Train-size ratios, ascending, in `(0, 1]`.
    pub ratios: Vec<f64>,
    /// Smaller datasets yield an empty curve.
    pub min_samples: usize,
    pub min_train: usize,
    /// Fraction held out at ratio 1.0.
    pub holdout: f64,
}

impl Default for LearningCurveOptions {
    fn default() -> Self {
        Self::from(&TrainingSettings::default())
    }
}

impl From<&TrainingSettings> for LearningCurveOptions {
    fn from(settings: &TrainingSettings) -> Self {
        Self {
            ratios: settings.learning_curve_ratios.clone(),
            min_samples: settings.learning_curve_min_samples,
            min_train: settings.learning_curve_min_train,
            holdout: settings.learning_curve_holdout,
        }
    }
}

/// Three parallel sequences ordered by strictly increasing train size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningCurve {
    pub train_sizes: Vec<usize>,
    pub train_scores: Vec<f64>,
    /// `None` when no held-out rows remained for that point.
    pub test_scores: Vec<Option<f64>>,
}

impl LearningCurve {
    pub fn is_empty(&self) -> bool {
        self.train_sizes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.train_sizes.len()
    }
}

/// Train and test sizes for one ratio, before the minimums are enforced.
fn split_sizes(n: usize, ratio: f64, options: &LearningCurveOptions) -> (usize, usize) {
    if ratio >= 1.0 {
        let held_out = ((n as f64 * options.holdout).floor() as usize).max(1);
        let train = n.saturating_sub(held_out).min(n.saturating_sub(1));
        (train, n - train)
    } else {
        let train = ((n as f64 * ratio).floor() as usize)
            .max(options.min_train)
            .min(n);
        (train, n - train)
    }
}

pub fn learning_curve(
    estimator: &Estimator,
    data: &LabeledDataset,
    options: &LearningCurveOptions,
    rng: &mut StdRng,
) -> LearningCurve {
    let n = data.len();
    let mut curve = LearningCurve::default();
    if n < options.min_samples {
        debug!(samples = n, "Not enough samples for a learning curve");
        return curve;
    }
    for &ratio in &options.ratios {
        let (train_size, test_size) = split_sizes(n, ratio, options);
        if train_size < options.min_train || test_size < 1 {
            debug!(ratio, train_size, test_size, "Skipping learning-curve point");
            continue;
        }
        if curve.train_sizes.last().is_some_and(|&last| train_size <= last) {
            continue;
        }
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        let (train_idx, test_idx) = indices.split_at(train_size);
        let train = data.subset(train_idx);
        if train.distinct_labels() < 2 {
            debug!(ratio, "Single-label training subset, skipping point");
            continue;
        }
        let fitted = match estimator.fit_scaled(&train) {
            Ok(fitted) => fitted,
            Err(err) => {
                debug!(ratio, "Training failed for learning-curve point: {err}");
                continue;
            }
        };
        let Ok(train_score) = fitted.accuracy(&train) else {
            continue;
        };
        let test_score = if test_idx.is_empty() {
            None
        } else {
            fitted.accuracy(&data.subset(test_idx)).ok()
        };
        curve.train_sizes.push(train_size);
        curve.train_scores.push(train_score);
        curve.test_scores.push(test_score);
    }
    curve
}
