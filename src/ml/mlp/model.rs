use serde::{Deserialize, Serialize};

use crate::ml::{argmax, softmax};

/// ReLU hidden layer followed by a softmax output layer.
///
/// Inputs are expected to be standardised already; the model keeps no
/// normalisation of its own. Weight matrices are row-major, one row per
/// output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub feature_len: usize,
    pub classes: Vec<String>,
    pub hidden_size: usize,
    pub hidden_weights: Vec<f32>,
    pub hidden_bias: Vec<f32>,
    pub output_weights: Vec<f32>,
    pub output_bias: Vec<f32>,
}

impl MlpModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_len == 0 || self.hidden_size == 0 || self.classes.is_empty() {
            return Err("MLP layers must be non-empty".to_string());
        }
        let shapes = [
            ("hidden_weights", self.hidden_weights.len(), self.hidden_size * self.feature_len),
            ("hidden_bias", self.hidden_bias.len(), self.hidden_size),
            ("output_weights", self.output_weights.len(), self.classes.len() * self.hidden_size),
            ("output_bias", self.output_bias.len(), self.classes.len()),
        ];
        for (name, actual, expected) in shapes {
            if actual != expected {
                return Err(format!("{name} has {actual} values, expected {expected}"));
            }
        }
        Ok(())
    }

    /// Hidden activations after ReLU.
    pub(super) fn hidden(&self, features: &[f32]) -> Vec<f32> {
        let mut units = dense(&self.hidden_weights, &self.hidden_bias, features);
        for unit in &mut units {
            *unit = unit.max(0.0);
        }
        units
    }

    pub(super) fn logits(&self, hidden: &[f32]) -> Vec<f32> {
        dense(&self.output_weights, &self.output_bias, hidden)
    }

    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        if features.len() != self.feature_len || self.hidden_size == 0 {
            return Vec::new();
        }
        softmax(&self.logits(&self.hidden(features)))
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        argmax(&self.predict_proba(features))
    }
}

/// `W x + b` with `W` stored as `bias.len()` rows of `input.len()` weights.
pub(super) fn dense(weights: &[f32], bias: &[f32], input: &[f32]) -> Vec<f32> {
    weights
        .chunks_exact(input.len().max(1))
        .zip(bias)
        .map(|(row, b)| b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_model() -> MlpModel {
        MlpModel {
            feature_len: 8,
            classes: vec!["melon".into(), "non_melon".into()],
            hidden_size: 2,
            hidden_weights: vec![0.0; 8 * 2],
            hidden_bias: vec![0.0; 2],
            output_weights: vec![0.0; 2 * 2],
            output_bias: vec![0.0; 2],
        }
    }

    #[test]
    fn softmax_output_sums_to_one() {
        let model = zero_model();
        model.validate().unwrap();
        let out = model.predict_proba(&[0.0; 8]);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut model = zero_model();
        assert!(model.predict_proba(&[0.0; 3]).is_empty());
        model.output_bias.push(0.0);
        assert!(model.validate().unwrap_err().contains("output_bias"));
    }

    #[test]
    fn dense_applies_rows_in_order() {
        let out = dense(&[1.0, 0.0, 0.0, 2.0], &[0.5, -1.0], &[3.0, 4.0]);
        assert_eq!(out, vec![3.5, 7.0]);
    }
}
