//! Gaussian naive Bayes.

use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

use super::argmax;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNbOptions {
    /// Added to every variance, relative to the largest feature variance.
    pub var_smoothing: f64,
}

impl Default for GaussianNbOptions {
    fn default() -> Self {
        Self { var_smoothing: 1e-9 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNbModel {
    pub classes: Vec<String>,
    /// `ln P(class)`; `None` for classes absent from training.
    pub log_priors: Vec<Option<f64>>,
    /// Shape: `[n_classes][n_features]`.
    pub means: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
}

pub fn train_gaussian_nb(
    dataset: &LabeledDataset,
    options: &GaussianNbOptions,
) -> Result<GaussianNbModel, String> {
    dataset.validate()?;
    if dataset.is_empty() {
        return Err("Empty dataset".to_string());
    }
    let k = dataset.classes.len();
    let d = dataset.feature_len();
    let counts = dataset.class_counts();
    let mut means = vec![vec![0.0f64; d]; k];
    for (row, &label) in dataset.x.iter().zip(&dataset.y) {
        for (acc, &v) in means[label].iter_mut().zip(row) {
            *acc += v as f64;
        }
    }
    for (class_means, &count) in means.iter_mut().zip(&counts) {
        for v in class_means.iter_mut() {
            *v /= count.max(1) as f64;
        }
    }
    let mut variances = vec![vec![0.0f64; d]; k];
    for (row, &label) in dataset.x.iter().zip(&dataset.y) {
        for i in 0..d {
            let diff = row[i] as f64 - means[label][i];
            variances[label][i] += diff * diff;
        }
    }
    let max_var = variances
        .iter()
        .zip(&counts)
        .flat_map(|(vars, &count)| vars.iter().map(move |v| v / count.max(1) as f64))
        .fold(0.0f64, f64::max);
    let epsilon = (options.var_smoothing * max_var).max(1e-12);
    for (class_vars, &count) in variances.iter_mut().zip(&counts) {
        for v in class_vars.iter_mut() {
            *v = *v / count.max(1) as f64 + epsilon;
        }
    }
    let total = dataset.len() as f64;
    let log_priors = counts
        .iter()
        .map(|&count| (count > 0).then(|| (count as f64 / total).ln()))
        .collect();
    Ok(GaussianNbModel {
        classes: dataset.classes.clone(),
        log_priors,
        means,
        variances,
    })
}

impl GaussianNbModel {
    pub fn validate(&self) -> Result<(), String> {
        let k = self.classes.len();
        if self.log_priors.len() != k || self.means.len() != k || self.variances.len() != k {
            return Err("Per-class parameter count mismatch".to_string());
        }
        if self.log_priors.iter().all(Option::is_none) {
            return Err("No class was seen during training".to_string());
        }
        Ok(())
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize {
        let scores: Vec<f32> = self
            .log_priors
            .iter()
            .enumerate()
            .map(|(class_idx, prior)| match prior {
                Some(prior) => (prior + self.log_likelihood(class_idx, features)) as f32,
                None => f32::NEG_INFINITY,
            })
            .collect();
        argmax(&scores)
    }

    fn log_likelihood(&self, class_idx: usize, features: &[f32]) -> f64 {
        let means = &self.means[class_idx];
        let vars = &self.variances[class_idx];
        features
            .iter()
            .zip(means.iter().zip(vars))
            .map(|(&x, (&mean, &var))| {
                let diff = x as f64 - mean;
                -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + diff * diff / var)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_gaussian_blobs() {
        let mut data = LabeledDataset::new(vec!["a".into(), "b".into()]);
        for i in 0..10 {
            let jitter = i as f32 * 0.05;
            data.push(vec![-1.0 + jitter, 0.0], 0);
            data.push(vec![1.0 + jitter, 0.1], 1);
        }
        let model = train_gaussian_nb(&data, &GaussianNbOptions::default()).unwrap();
        model.validate().unwrap();
        assert_eq!(model.predict_class_index(&[-1.2, 0.0]), 0);
        assert_eq!(model.predict_class_index(&[1.3, 0.0]), 1);
    }

    #[test]
    fn unseen_class_is_never_predicted() {
        let mut data = LabeledDataset::new(vec!["a".into(), "b".into()]);
        data.push(vec![0.0], 1);
        data.push(vec![1.0], 1);
        let model = train_gaussian_nb(&data, &GaussianNbOptions::default()).unwrap();
        assert_eq!(model.predict_class_index(&[0.5]), 1);
    }
}
