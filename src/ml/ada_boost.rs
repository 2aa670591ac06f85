//! Multi-class AdaBoost (SAMME) over shallow classification trees.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

use super::argmax;
use super::tree::{DecisionTree, TreeOptions, fit_weighted};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoostOptions {
    pub rounds: usize,
    pub learning_rate: f64,
    /// Fraction of rows drawn (without replacement) for each weak learner.
    pub sample_ratio: f64,
    pub base: TreeOptions,
    pub seed: u64,
}

impl Default for AdaBoostOptions {
    fn default() -> Self {
        Self {
            rounds: 150,
            learning_rate: 0.05,
            sample_ratio: 0.8,
            base: TreeOptions {
                max_depth: 2,
                min_samples_leaf: 1,
                min_impurity_decrease: 0.0,
                max_features: None,
                seed: 42,
            },
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoostModel {
    pub classes: Vec<String>,
    pub learners: Vec<DecisionTree>,
    /// Vote weight of each learner.
    pub alphas: Vec<f32>,
}

pub fn train_ada_boost(
    dataset: &LabeledDataset,
    options: &AdaBoostOptions,
) -> Result<AdaBoostModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    let k = dataset.classes.len();
    if k < 2 {
        return Err("Need at least 2 classes".to_string());
    }
    let n = dataset.len();
    let sample_size = ((n as f64 * options.sample_ratio).round() as usize).clamp(1, n);
    let mut weights = vec![1.0 / n as f64; n];
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut learners = Vec::new();
    let mut alphas = Vec::new();

    for _round in 0..options.rounds {
        let rows = sample(&mut rng, n, sample_size).into_vec();
        let learner = fit_weighted(dataset, &rows, &weights, &options.base, &mut rng);
        let predictions: Vec<usize> = dataset
            .x
            .iter()
            .map(|row| learner.predict_class_index(row))
            .collect();
        let total: f64 = weights.iter().sum();
        let error: f64 = predictions
            .iter()
            .zip(&dataset.y)
            .zip(&weights)
            .filter(|((p, y), _)| p != y)
            .map(|(_, w)| w)
            .sum::<f64>()
            / total;
        // No better than chance for K classes: stop boosting.
        if error >= 1.0 - 1.0 / k as f64 {
            break;
        }
        let error = error.max(1e-10);
        let alpha = options.learning_rate * (((1.0 - error) / error).ln() + ((k - 1) as f64).ln());
        learners.push(learner);
        alphas.push(alpha as f32);
        if error <= 1e-10 {
            break;
        }
        for ((w, p), y) in weights.iter_mut().zip(&predictions).zip(&dataset.y) {
            if p != y {
                *w *= alpha.exp();
            }
        }
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
    }
    if learners.is_empty() {
        return Err("No weak learner beat chance".to_string());
    }
    Ok(AdaBoostModel {
        classes: dataset.classes.clone(),
        learners,
        alphas,
    })
}

impl AdaBoostModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.learners.is_empty() || self.learners.len() != self.alphas.len() {
            return Err("Learner/alpha count mismatch".to_string());
        }
        self.learners.iter().try_for_each(DecisionTree::validate)
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        let mut votes = vec![0.0f32; self.classes.len()];
        for (learner, &alpha) in self.learners.iter().zip(&self.alphas) {
            votes[learner.predict_class_index(features)] += alpha;
        }
        argmax(&votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boosts_an_interval_concept() {
        // Positive inside (0.3, 0.7): needs more than one split.
        let mut data = LabeledDataset::new(vec!["pos".into(), "neg".into()]);
        for i in 0..50 {
            let x = i as f32 / 50.0;
            data.push(vec![x], if x > 0.3 && x < 0.7 { 0 } else { 1 });
        }
        let options = AdaBoostOptions {
            rounds: 30,
            learning_rate: 0.5,
            ..AdaBoostOptions::default()
        };
        let model = train_ada_boost(&data, &options).unwrap();
        model.validate().unwrap();
        assert_eq!(model.predict_class_index(&[0.5]), 0);
        assert_eq!(model.predict_class_index(&[0.05]), 1);
        assert_eq!(model.predict_class_index(&[0.95]), 1);
    }
}
