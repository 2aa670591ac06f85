//! Cross-Validation Engine: k contiguous folds over shuffled indices.
//!
//! Every fold fits its own scaler on its training partition and trains a
//! fresh model. Degenerate folds record `None` for every metric; summaries
//! only use the folds that produced a value.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::estimator::Estimator;
use crate::dataset::LabeledDataset;

/// Metric slots recorded per fold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub accuracy: Vec<Option<f64>>,
    /// Keyed `precision_<label>`, `recall_<label>`, `f1_<label>`.
    #[serde(flatten)]
    pub per_class: BTreeMap<String, Vec<Option<f64>>>,
}

/// Mean and population standard deviation over retained fold values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
    /// Folds that produced a value.
    pub folds: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub k_folds: usize,
    pub metrics_per_fold: FoldMetrics,
    /// Empty when no fold produced an accuracy.
    pub summary: BTreeMap<String, MetricSummary>,
}

impl CrossValidationResult {
    pub fn is_inconclusive(&self) -> bool {
        self.summary.is_empty()
    }

    fn empty(k_folds: usize) -> Self {
        Self {
            k_folds,
            metrics_per_fold: FoldMetrics::default(),
            summary: BTreeMap::new(),
        }
    }
}

/// Shuffle indices once and cut them into `k` contiguous folds; the last
/// fold takes the remainder.
pub fn make_folds(n: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let k = k.max(1);
    let fold_size = n / k;
    (0..k)
        .map(|fold| {
            let start = fold * fold_size;
            let end = if fold + 1 == k { n } else { start + fold_size };
            indices[start..end].to_vec()
        })
        .collect()
}

/// Run k-fold cross-validation; fewer samples than folds is inconclusive.
pub fn cross_validate(
    estimator: &Estimator,
    data: &LabeledDataset,
    k: usize,
    rng: &mut StdRng,
) -> CrossValidationResult {
    if k < 2 || data.len() < k {
        warn!(samples = data.len(), k, "Not enough samples for cross-validation");
        return CrossValidationResult::empty(k);
    }
    let folds = make_folds(data.len(), k, rng);
    cross_validate_with_folds(estimator, data, &folds)
}

/// Cross-validate over caller-provided folds.
pub fn cross_validate_with_folds(
    estimator: &Estimator,
    data: &LabeledDataset,
    folds: &[Vec<usize>],
) -> CrossValidationResult {
    let k = folds.len();
    let mut metrics = FoldMetrics::default();
    for label in &data.classes {
        for prefix in ["precision", "recall", "f1"] {
            metrics.per_class.insert(format!("{prefix}_{label}"), Vec::with_capacity(k));
        }
    }

    for (fold_idx, valid_idx) in folds.iter().enumerate() {
        let train_idx: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != fold_idx)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();
        let outcome = evaluate_fold(estimator, data, &train_idx, valid_idx);
        match outcome {
            Ok(report) => {
                metrics.accuracy.push(Some(report.accuracy));
                for (label, class) in &report.classes {
                    push(&mut metrics, &format!("precision_{label}"), class.precision);
                    push(&mut metrics, &format!("recall_{label}"), class.recall);
                    push(&mut metrics, &format!("f1_{label}"), class.f1_score);
                }
            }
            Err(reason) => {
                debug!(fold = fold_idx + 1, "Skipping fold: {reason}");
                metrics.accuracy.push(None);
                for values in metrics.per_class.values_mut() {
                    values.push(None);
                }
            }
        }
    }

    let summary = if metrics.accuracy.iter().any(Option::is_some) {
        std::iter::once(("accuracy".to_string(), &metrics.accuracy))
            .chain(metrics.per_class.iter().map(|(name, values)| (name.clone(), values)))
            .filter_map(|(name, values)| summarize(values).map(|summary| (name, summary)))
            .collect()
    } else {
        warn!("Cross-validation inconclusive: no fold produced an accuracy");
        BTreeMap::new()
    };
    CrossValidationResult {
        k_folds: k,
        metrics_per_fold: metrics,
        summary,
    }
}

fn push(metrics: &mut FoldMetrics, key: &str, value: f64) {
    if let Some(values) = metrics.per_class.get_mut(key) {
        values.push(Some(value));
    }
}

fn evaluate_fold(
    estimator: &Estimator,
    data: &LabeledDataset,
    train_idx: &[usize],
    valid_idx: &[usize],
) -> Result<super::metrics::EvaluationReport, String> {
    if train_idx.is_empty() || valid_idx.is_empty() {
        return Err("empty partition".to_string());
    }
    let train = data.subset(train_idx);
    if train.distinct_labels() < 2 {
        return Err("training partition has a single label".to_string());
    }
    let fitted = estimator.fit_scaled(&train)?;
    fitted.evaluate(&data.subset(valid_idx))
}

/// Mean and population std of the present values; `None` when none are present.
pub fn summarize(values: &[Option<f64>]) -> Option<MetricSummary> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(MetricSummary {
        mean,
        std: var.sqrt(),
        folds: present.len(),
    })
}
