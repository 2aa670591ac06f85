use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::LogRegModel;
use crate::dataset::LabeledDataset;
use crate::ml::class_weights;

/// Training options for the logistic regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub seed: u64,
    pub balance_classes: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 150,
            learning_rate: 0.05,
            l2: 1e-3,
            batch_size: 64,
            seed: 42,
            balance_classes: false,
        }
    }
}

pub fn train_logreg(
    dataset: &LabeledDataset,
    options: &TrainOptions,
) -> Result<LogRegModel, String> {
    if dataset.is_empty() {
        return Err("Empty training set".to_string());
    }
    dataset.validate()?;
    let class_count = dataset.classes.len();
    if class_count == 0 {
        return Err("No classes available for training".to_string());
    }
    let dim = dataset.feature_len();
    if dim == 0 {
        return Err("Training rows have no features".to_string());
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model = LogRegModel {
        feature_len: dim,
        classes: dataset.classes.clone(),
        weights: (0..class_count * dim)
            .map(|_| rng.random_range(-0.005..0.005))
            .collect(),
        bias: vec![0.0; class_count],
    };
    let weights = class_weights(&dataset.y, class_count, options.balance_classes);
    let l2 = options.l2.max(0.0);

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut grad_w = vec![0.0f32; model.weights.len()];
    let mut grad_b = vec![0.0f32; class_count];
    for _ in 0..options.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(options.batch_size.max(1)) {
            grad_w.fill(0.0);
            grad_b.fill(0.0);
            let mut seen = 0.0f32;
            for &row in batch {
                let label = dataset.y[row];
                let weight = weights.get(label).copied().unwrap_or(0.0);
                if weight == 0.0 {
                    continue;
                }
                let x = &dataset.x[row];
                let probs = model.predict_proba(x);
                for (class, (p, grads)) in probs
                    .iter()
                    .zip(grad_w.chunks_exact_mut(dim))
                    .enumerate()
                {
                    let delta = (p - if class == label { 1.0 } else { 0.0 }) * weight;
                    grad_b[class] += delta;
                    for (g, &value) in grads.iter_mut().zip(x) {
                        *g += delta * value;
                    }
                }
                seen += weight;
            }
            if seen == 0.0 {
                continue;
            }
            let step = options.learning_rate / seen;
            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                *w -= step * g + options.learning_rate * l2 * *w;
            }
            for (b, g) in model.bias.iter_mut().zip(&grad_b) {
                *b -= step * g;
            }
        }
    }

    model.validate()?;
    Ok(model)
}
