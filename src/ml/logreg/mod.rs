//! Multinomial logistic regression trained with mini-batch SGD.

use serde::{Deserialize, Serialize};

use crate::ml::{argmax, softmax};

mod train;
pub use train::{TrainOptions, train_logreg};

/// Linear softmax model over standardised features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRegModel {
    pub feature_len: usize,
    pub classes: Vec<String>,
    /// Row-major `[class][feature]`.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl LogRegModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() || self.feature_len == 0 {
            return Err("Logistic regression needs classes and features".to_string());
        }
        let expected = self.classes.len() * self.feature_len;
        if self.weights.len() != expected || self.bias.len() != self.classes.len() {
            return Err(format!(
                "Expected {expected} weights and {} biases, found {} and {}",
                self.classes.len(),
                self.weights.len(),
                self.bias.len()
            ));
        }
        if let Some(bad) = self.weights.iter().chain(&self.bias).find(|w| !w.is_finite()) {
            return Err(format!("Non-finite parameter {bad}"));
        }
        Ok(())
    }

    /// Softmax over `W x + b`; empty when the row width is wrong.
    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        if features.len() != self.feature_len {
            return Vec::new();
        }
        let logits: Vec<f32> = (0..self.classes.len())
            .map(|c| {
                let base = c * self.feature_len;
                self.bias[c]
                    + self.weights[base..base + self.feature_len]
                        .iter()
                        .zip(features)
                        .map(|(w, x)| w * x)
                        .sum::<f32>()
            })
            .collect();
        softmax(&logits)
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_proba(features))
    }
}
