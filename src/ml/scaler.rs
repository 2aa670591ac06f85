//! Per-feature z-score standardisation.
//!
//! [`ScaledDataset`] can only be produced by [`StandardScaler::transform`], and
//! trained models only accept scaled input, so a row can never reach a model
//! without passing through a fitted scaler.

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;

/// Dimensions with a smaller spread are left unscaled.
const MIN_STD: f32 = 1e-8;

/// Fitted mean and standard deviation per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl StandardScaler {
    /// Name recorded in model metadata.
    pub const CLASS_NAME: &'static str = "StandardScaler";

    /// Fit on every row of `data`.
    pub fn fit(data: &LabeledDataset) -> Result<Self, String> {
        if data.is_empty() {
            return Err("Cannot fit a scaler on an empty dataset".to_string());
        }
        data.validate()?;
        let d = data.feature_len();
        let n = data.len() as f64;
        let mut mean = vec![0.0f64; d];
        for row in &data.x {
            for (acc, &v) in mean.iter_mut().zip(row) {
                *acc += v as f64;
            }
        }
        for v in &mut mean {
            *v /= n;
        }
        let mut var = vec![0.0f64; d];
        for row in &data.x {
            for i in 0..d {
                let diff = row[i] as f64 - mean[i];
                var[i] += diff * diff;
            }
        }
        let std = var
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt() as f32;
                if std.is_finite() && std >= MIN_STD { std } else { 1.0 }
            })
            .collect();
        Ok(Self {
            mean: mean.into_iter().map(|v| v as f32).collect(),
            std,
        })
    }

    pub fn feature_len(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }

    /// Structural check for scalers loaded from storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.is_empty() {
            return Err("Scaler has no features".to_string());
        }
        if self.mean.len() != self.std.len() {
            return Err("Scaler mean/std length mismatch".to_string());
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("Scaler std must be finite and > 0".to_string());
        }
        Ok(())
    }

    /// Standardise a copy of `data`.
    pub fn transform(&self, data: &LabeledDataset) -> Result<ScaledDataset, String> {
        if !data.is_empty() && data.feature_len() != self.feature_len() {
            return Err(format!(
                "Scaler expects {} features, dataset has {}",
                self.feature_len(),
                data.feature_len()
            ));
        }
        let mut scaled = LabeledDataset::new(data.classes.clone());
        for (row, &label) in data.x.iter().zip(&data.y) {
            if row.len() != self.feature_len() {
                return Err("Inconsistent feature row length".to_string());
            }
            scaled.push(self.transform_row(row), label);
        }
        Ok(ScaledDataset(scaled))
    }

    fn transform_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(&v, (&mean, &std))| (v - mean) / std)
            .collect()
    }
}

/// A dataset standardised by a fitted [`StandardScaler`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledDataset(LabeledDataset);

impl ScaledDataset {
    /// Rows at `indices`, still scaled.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self(self.0.subset(indices))
    }

    pub fn into_inner(self) -> LabeledDataset {
        self.0
    }
}

impl Deref for ScaledDataset {
    type Target = LabeledDataset;

    fn deref(&self) -> &LabeledDataset {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: &[[f32; 2]]) -> LabeledDataset {
        let mut data = LabeledDataset::new(vec!["a".into(), "b".into()]);
        for (idx, row) in rows.iter().enumerate() {
            data.push(row.to_vec(), idx % 2);
        }
        data
    }

    #[test]
    fn transform_centres_and_scales() {
        let data = dataset(&[[1.0, 5.0], [3.0, 5.0]]);
        let scaler = StandardScaler::fit(&data).unwrap();
        assert_eq!(scaler.mean(), &[2.0, 5.0]);
        // constant column keeps unit std
        assert_eq!(scaler.std(), &[1.0, 1.0]);
        let scaled = scaler.transform(&data).unwrap();
        assert_eq!(scaled.x, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
        assert_eq!(scaled.y, data.y);
    }

    #[test]
    fn empty_fit_and_width_mismatch_fail() {
        assert!(StandardScaler::fit(&dataset(&[])).is_err());
        let scaler = StandardScaler::fit(&dataset(&[[1.0, 2.0]])).unwrap();
        let mut wide = LabeledDataset::new(vec!["a".into(), "b".into()]);
        wide.push(vec![1.0, 2.0, 3.0], 0);
        assert!(scaler.transform(&wide).is_err());
    }

    #[test]
    fn loaded_scaler_is_validated() {
        let scaler: StandardScaler =
            serde_json::from_str(r#"{"mean":[0.0,1.0],"std":[1.0,0.0]}"#).unwrap();
        assert!(scaler.validate().is_err());
    }
}
