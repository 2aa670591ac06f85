use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::MlpModel;
use crate::dataset::LabeledDataset;
use crate::ml::{class_weights, softmax};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub hidden_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
    /// Probability of zeroing a hidden unit during training.
    pub dropout: f32,
    pub label_smoothing: f32,
    pub balance_classes: bool,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            hidden_size: 32,
            epochs: 150,
            batch_size: 64,
            learning_rate: 0.01,
            l2_penalty: 1e-3,
            dropout: 0.2,
            label_smoothing: 0.0,
            balance_classes: false,
            seed: 42,
        }
    }
}

/// Gradient buffers shaped like the model parameters.
struct Gradients {
    hidden_weights: Vec<f32>,
    hidden_bias: Vec<f32>,
    output_weights: Vec<f32>,
    output_bias: Vec<f32>,
    total_weight: f32,
}

impl Gradients {
    fn zeros_like(model: &MlpModel) -> Self {
        Self {
            hidden_weights: vec![0.0; model.hidden_weights.len()],
            hidden_bias: vec![0.0; model.hidden_bias.len()],
            output_weights: vec![0.0; model.output_weights.len()],
            output_bias: vec![0.0; model.output_bias.len()],
            total_weight: 0.0,
        }
    }

    /// Backpropagate one row's softmax cross-entropy error.
    fn accumulate(
        &mut self,
        model: &MlpModel,
        input: &[f32],
        hidden: &[f32],
        output_error: &[f32],
        weight: f32,
    ) {
        let width = model.hidden_size;
        let mut hidden_error = vec![0.0f32; width];
        for (class, &delta) in output_error.iter().enumerate() {
            let delta = delta * weight;
            self.output_bias[class] += delta;
            let row = class * width..(class + 1) * width;
            for ((grad, &w), (&act, err)) in self.output_weights[row.clone()]
                .iter_mut()
                .zip(&model.output_weights[row])
                .zip(hidden.iter().zip(hidden_error.iter_mut()))
            {
                *grad += delta * act;
                *err += delta * w;
            }
        }
        for (unit, &err) in hidden_error.iter().enumerate() {
            // Dropped or inactive units carry no gradient.
            if hidden[unit] <= 0.0 {
                continue;
            }
            self.hidden_bias[unit] += err;
            let row = unit * model.feature_len..(unit + 1) * model.feature_len;
            for (grad, &x) in self.hidden_weights[row].iter_mut().zip(input) {
                *grad += err * x;
            }
        }
        self.total_weight += weight;
    }

    fn apply(&self, model: &mut MlpModel, learning_rate: f32, l2: f32) {
        let step = learning_rate / self.total_weight;
        let decayed = |params: &mut [f32], grads: &[f32]| {
            for (p, g) in params.iter_mut().zip(grads) {
                *p -= step * (g + l2 * *p);
            }
        };
        decayed(&mut model.hidden_weights[..], &self.hidden_weights[..]);
        decayed(&mut model.output_weights[..], &self.output_weights[..]);
        for (p, g) in model.hidden_bias.iter_mut().zip(&self.hidden_bias) {
            *p -= step * g;
        }
        for (p, g) in model.output_bias.iter_mut().zip(&self.output_bias) {
            *p -= step * g;
        }
    }
}

fn glorot(rng: &mut StdRng, len: usize, fan_in: usize, fan_out: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    (0..len)
        .map(|_| rng.random_range(-limit..=limit))
        .collect()
}

pub fn train_mlp(dataset: &LabeledDataset, options: &TrainOptions) -> Result<MlpModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    let class_count = dataset.classes.len();
    if class_count < 2 {
        return Err("Need at least 2 classes".to_string());
    }
    let inputs = dataset.feature_len();
    let width = options.hidden_size.max(1);
    let dropout = options.dropout.clamp(0.0, 0.9);
    let smoothing = options.label_smoothing.clamp(0.0, 0.2);
    let off_target = smoothing / (class_count - 1) as f32;
    let weights = class_weights(&dataset.y, class_count, options.balance_classes);

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model = MlpModel {
        feature_len: inputs,
        classes: dataset.classes.clone(),
        hidden_size: width,
        hidden_weights: glorot(&mut rng, width * inputs, inputs, width),
        hidden_bias: vec![0.0; width],
        output_weights: glorot(&mut rng, class_count * width, width, class_count),
        output_bias: vec![0.0; class_count],
    };

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    for _ in 0..options.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(options.batch_size.max(1)) {
            let mut grads = Gradients::zeros_like(&model);
            for &row in batch {
                let label = dataset.y[row];
                let weight = weights.get(label).copied().unwrap_or(0.0);
                if weight == 0.0 {
                    continue;
                }
                let input = &dataset.x[row];
                let mut hidden = model.hidden(input);
                if dropout > 0.0 {
                    for unit in &mut hidden {
                        *unit = if rng.random::<f32>() < dropout {
                            0.0
                        } else {
                            *unit / (1.0 - dropout)
                        };
                    }
                }
                let mut error = softmax(&model.logits(&hidden));
                for (class, p) in error.iter_mut().enumerate() {
                    *p -= if class == label {
                        1.0 - smoothing
                    } else {
                        off_target
                    };
                }
                grads.accumulate(&model, input, &hidden, &error, weight);
            }
            if grads.total_weight > 0.0 {
                grads.apply(&mut model, options.learning_rate, options.l2_penalty);
            }
        }
    }

    model.validate()?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> LabeledDataset {
        let mut data = LabeledDataset::new(vec!["melon".into(), "non_melon".into()]);
        for i in 0..40 {
            let jitter = (i % 7) as f32 * 0.1;
            data.push(vec![1.0 + jitter, 1.0 - jitter], 0);
            data.push(vec![-1.0 - jitter, -1.0 + jitter], 1);
        }
        data
    }

    #[test]
    fn fits_separable_blobs() {
        let data = blobs();
        let options = TrainOptions {
            epochs: 100,
            learning_rate: 0.05,
            dropout: 0.0,
            batch_size: 8,
            ..TrainOptions::default()
        };
        let model = train_mlp(&data, &options).unwrap();
        let correct = data
            .x
            .iter()
            .zip(&data.y)
            .filter(|(row, label)| model.predict_class_index(row) == **label)
            .count();
        assert!(correct as f32 / data.len() as f32 >= 0.9, "correct={correct}");
    }

    #[test]
    fn training_is_deterministic_per_seed() {
        let options = TrainOptions {
            epochs: 3,
            hidden_size: 4,
            ..TrainOptions::default()
        };
        assert_eq!(train_mlp(&blobs(), &options), train_mlp(&blobs(), &options));
    }

    #[test]
    fn rejects_empty_dataset() {
        let data = LabeledDataset::new(vec!["melon".into(), "non_melon".into()]);
        assert!(train_mlp(&data, &TrainOptions::default()).is_err());
    }
}
