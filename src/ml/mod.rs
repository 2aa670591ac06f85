//! Estimators, scaling, evaluation and the training-time analyses built on them.
//!
//! Every estimator is implemented in-crate and trains on standardised rows;
//! the orchestration layer only sees [`Estimator`] and [`ScaledModel`].

pub mod ada_boost;
pub mod balance;
pub mod cross_validation;
pub mod estimator;
pub mod gaussian_nb;
pub mod knn;
pub mod learning_curve;
pub mod logit_boost;
pub mod logreg;
pub mod metrics;
pub mod mlp;
pub mod scaler;
pub mod tree;

pub use estimator::{Classifier, Estimator, Hyperparameters, ScaledModel, TrainedModel};
pub use scaler::{ScaledDataset, StandardScaler};

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (idx, &value)| {
            if value > best.1 { (idx, value) } else { best }
        })
        .0
}

/// Numerically stable softmax; uniform when every exponent underflows.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / logits.len().max(1) as f32; logits.len()]
    }
}

/// Per-class loss weights: inverse frequency when `balance` is set, otherwise
/// all ones. Classes without rows get weight zero.
pub fn class_weights(labels: &[usize], class_count: usize, balance: bool) -> Vec<f32> {
    if !balance {
        return vec![1.0; class_count];
    }
    let mut counts = vec![0usize; class_count];
    for &label in labels.iter().filter(|&&label| label < class_count) {
        counts[label] += 1;
    }
    let total: usize = counts.iter().sum();
    counts
        .iter()
        .map(|&count| match count {
            0 => 0.0,
            count => total as f32 / (class_count * count) as f32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_weights_favour_the_minority() {
        assert_eq!(class_weights(&[0, 0, 0, 1], 2, false), vec![1.0, 1.0]);
        let weights = class_weights(&[0, 0, 0, 1], 3, true);
        assert!(weights[1] > weights[0]);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn softmax_sums_to_one_and_argmax_prefers_first() {
        let probs = softmax(&[1.0, 1.0, 3.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(argmax(&probs), 2);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert!(softmax(&[]).is_empty());
    }
}
