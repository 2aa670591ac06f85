//! Binary LogitBoost over weighted regression stumps.
//!
//! The additive score `F(x)` models `p(positive) = 1 / (1 + exp(-2F))`. Each
//! round fits a stump to the Newton working response `z = (y - p) / (p(1 - p))`
//! with weights `p(1 - p)` on a random subsample of rows.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

/// Working responses are clipped to keep early rounds stable.
const MAX_RESPONSE: f64 = 4.0;
const MIN_WEIGHT: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogitBoostOptions {
    pub rounds: usize,
    /// Shrinkage applied to every stump.
    pub learning_rate: f32,
    /// Fraction of rows each round is fitted on.
    pub sample_ratio: f64,
    pub seed: u64,
}

impl Default for LogitBoostOptions {
    fn default() -> Self {
        Self {
            rounds: 150,
            learning_rate: 0.05,
            sample_ratio: 0.5,
            seed: 42,
        }
    }
}

/// One split on one feature with a constant output per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionStump {
    pub feature_index: u16,
    pub threshold: f32,
    /// Output for `value <= threshold`.
    pub left: f32,
    pub right: f32,
}

impl RegressionStump {
    pub fn predict(&self, features: &[f32]) -> f32 {
        match features.get(self.feature_index as usize) {
            Some(&value) if value > self.threshold => self.right,
            _ => self.left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogitBoostModel {
    pub feature_len: usize,
    /// Exactly two labels; index 0 is the one `F > 0` votes for.
    pub classes: Vec<String>,
    pub learning_rate: f32,
    pub stumps: Vec<RegressionStump>,
}

impl LogitBoostModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.len() != 2 {
            return Err("LogitBoost needs exactly two classes".to_string());
        }
        if let Some(idx) = self
            .stumps
            .iter()
            .position(|stump| stump.feature_index as usize >= self.feature_len)
        {
            return Err(format!("Stump {idx} splits on an unknown feature"));
        }
        Ok(())
    }

    /// Additive score `F(x)`.
    pub fn score(&self, features: &[f32]) -> f32 {
        self.stumps
            .iter()
            .map(|stump| 0.5 * self.learning_rate * stump.predict(features))
            .sum()
    }

    /// `[p(class 0), p(class 1)]`.
    pub fn predict_proba(&self, features: &[f32]) -> [f32; 2] {
        let p = sigmoid2(self.score(features) as f64) as f32;
        [p, 1.0 - p]
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        if self.score(features) > 0.0 { 0 } else { 1 }
    }
}

fn sigmoid2(score: f64) -> f64 {
    1.0 / (1.0 + (-2.0 * score).exp())
}

pub fn train_logit_boost(
    dataset: &LabeledDataset,
    options: &LogitBoostOptions,
) -> Result<LogitBoostModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    if dataset.classes.len() != 2 {
        return Err(format!(
            "LogitBoost is binary; got {} classes",
            dataset.classes.len()
        ));
    }
    let n = dataset.len();
    let sample_size = ((n as f64 * options.sample_ratio).round() as usize).clamp(1, n);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let targets: Vec<f64> = dataset
        .y
        .iter()
        .map(|&label| if label == 0 { 1.0 } else { 0.0 })
        .collect();
    let mut scores = vec![0.0f64; n];
    let mut stumps = Vec::with_capacity(options.rounds);

    for _ in 0..options.rounds {
        let rows = sample(&mut rng, n, sample_size).into_vec();
        let mut responses = Vec::with_capacity(rows.len());
        let mut weights = Vec::with_capacity(rows.len());
        for &row in &rows {
            let p = sigmoid2(scores[row]);
            let w = (p * (1.0 - p)).max(MIN_WEIGHT);
            responses.push(((targets[row] - p) / w).clamp(-MAX_RESPONSE, MAX_RESPONSE));
            weights.push(w);
        }
        let stump = fit_stump(dataset, &rows, &responses, &weights);
        let step = 0.5 * options.learning_rate as f64;
        for (row, score) in scores.iter_mut().enumerate() {
            *score += step * stump.predict(&dataset.x[row]) as f64;
        }
        stumps.push(stump);
    }

    Ok(LogitBoostModel {
        feature_len: dataset.feature_len(),
        classes: dataset.classes.clone(),
        learning_rate: options.learning_rate,
        stumps,
    })
}

/// Weighted least-squares stump over `rows`, exact split search per feature.
fn fit_stump(
    dataset: &LabeledDataset,
    rows: &[usize],
    responses: &[f64],
    weights: &[f64],
) -> RegressionStump {
    let total_w: f64 = weights.iter().sum();
    let total_s: f64 = responses.iter().zip(weights).map(|(z, w)| z * w).sum();
    let mean = (total_s / total_w.max(MIN_WEIGHT)) as f32;
    let mut best = RegressionStump {
        feature_index: 0,
        threshold: 0.0,
        left: mean,
        right: mean,
    };
    // Larger is better: S_L^2 / W_L + S_R^2 / W_R.
    let mut best_gain = total_s * total_s / total_w.max(MIN_WEIGHT);

    let mut order: Vec<usize> = (0..rows.len()).collect();
    for feature in 0..dataset.feature_len() {
        let value = |pos: usize| dataset.x[rows[pos]][feature];
        order.sort_by(|&a, &b| value(a).total_cmp(&value(b)));
        let mut left_w = 0.0;
        let mut left_s = 0.0;
        for window in order.windows(2) {
            let (current, next) = (window[0], window[1]);
            left_w += weights[current];
            left_s += responses[current] * weights[current];
            if value(current) == value(next) {
                continue;
            }
            let right_w = total_w - left_w;
            let right_s = total_s - left_s;
            if left_w < MIN_WEIGHT || right_w < MIN_WEIGHT {
                continue;
            }
            let gain = left_s * left_s / left_w + right_s * right_s / right_w;
            if gain > best_gain {
                best_gain = gain;
                best = RegressionStump {
                    feature_index: feature as u16,
                    threshold: 0.5 * (value(current) + value(next)),
                    left: (left_s / left_w) as f32,
                    right: (right_s / right_w) as f32,
                };
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_data() -> LabeledDataset {
        let mut data = LabeledDataset::new(vec!["ripe".into(), "unripe".into()]);
        for i in 0..40 {
            let x = i as f32 / 40.0;
            data.push(vec![0.3, x], if x >= 0.5 { 0 } else { 1 });
        }
        data
    }

    #[test]
    fn learns_a_single_feature_threshold() {
        let options = LogitBoostOptions {
            rounds: 40,
            learning_rate: 0.5,
            ..LogitBoostOptions::default()
        };
        let model = train_logit_boost(&threshold_data(), &options).unwrap();
        model.validate().unwrap();
        assert_eq!(model.stumps.len(), 40);
        assert_eq!(model.predict_class_index(&[0.3, 0.9]), 0);
        assert_eq!(model.predict_class_index(&[0.3, 0.1]), 1);
        let [p_ripe, p_unripe] = model.predict_proba(&[0.3, 0.9]);
        assert!(p_ripe > 0.5);
        assert!((p_ripe + p_unripe - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stump_boundary_goes_left() {
        let stump = RegressionStump {
            feature_index: 0,
            threshold: 0.5,
            left: -1.0,
            right: 2.0,
        };
        assert_eq!(stump.predict(&[0.5]), -1.0);
        assert_eq!(stump.predict(&[0.6]), 2.0);
    }

    #[test]
    fn rejects_non_binary_schema() {
        let mut data = LabeledDataset::new(vec!["a".into(), "b".into(), "c".into()]);
        data.push(vec![1.0], 0);
        data.push(vec![2.0], 1);
        assert!(train_logit_boost(&data, &LogitBoostOptions::default()).is_err());
    }
}
