//! Brute-force k-nearest-neighbours over the stored (scaled) training rows.

use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

use super::argmax;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnOptions {
    pub k: usize,
    /// Weight votes by inverse distance.
    pub weighted: bool,
}

impl Default for KnnOptions {
    fn default() -> Self {
        Self { k: 5, weighted: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    pub classes: Vec<String>,
    pub k: usize,
    pub weighted: bool,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

pub fn train_knn(dataset: &LabeledDataset, options: &KnnOptions) -> Result<KnnModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    if options.k == 0 {
        return Err("k must be at least 1".to_string());
    }
    Ok(KnnModel {
        classes: dataset.classes.clone(),
        k: options.k,
        weighted: options.weighted,
        x: dataset.x.clone(),
        y: dataset.y.clone(),
    })
}

impl KnnModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.x.is_empty() || self.x.len() != self.y.len() {
            return Err("KNN model has no usable training rows".to_string());
        }
        if self.y.iter().any(|&label| label >= self.classes.len()) {
            return Err("Label index out of range".to_string());
        }
        Ok(())
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        let mut distances: Vec<(f32, usize)> = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(row, &label)| (euclidean(row, features), label))
            .collect();
        let k = self.k.min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k, |a, b| a.0.total_cmp(&b.0));
        }
        let mut votes = vec![0.0f32; self.classes.len()];
        for &(distance, label) in &distances[..k] {
            // An exact match outweighs everything else.
            let weight = if !self.weighted {
                1.0
            } else if distance == 0.0 {
                f32::MAX / k as f32
            } else {
                1.0 / distance
            };
            votes[label] += weight;
        }
        argmax(&votes)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
