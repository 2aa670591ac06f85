//! Evaluation metrics for binary and multi-class classifiers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Square table of counts, rows indexed by true class and columns by
/// predicted class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    rows: Vec<Vec<u32>>,
}

impl ConfusionMatrix {
    pub fn new(class_count: usize) -> Self {
        Self {
            rows: vec![vec![0; class_count]; class_count],
        }
    }

    /// Tally parallel truth/prediction slices.
    pub fn from_predictions(class_count: usize, truth: &[usize], predicted: &[usize]) -> Self {
        let mut matrix = Self::new(class_count);
        for (&t, &p) in truth.iter().zip(predicted) {
            matrix.record(t, p);
        }
        matrix
    }

    /// Count one prediction; labels outside the schema are dropped.
    pub fn record(&mut self, truth: usize, predicted: usize) {
        if let Some(cell) = self.rows.get_mut(truth).and_then(|row| row.get_mut(predicted)) {
            *cell = cell.saturating_add(1);
        }
    }

    pub fn class_count(&self) -> usize {
        self.rows.len()
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().flatten().map(|&v| u64::from(v)).sum()
    }

    /// True examples of `class`.
    pub fn support(&self, class: usize) -> u32 {
        self.rows[class].iter().sum()
    }

    /// Examples predicted as `class`.
    pub fn predicted(&self, class: usize) -> u32 {
        self.rows.iter().map(|row| row[class]).sum()
    }

    pub fn hits(&self, class: usize) -> u32 {
        self.rows[class][class]
    }

    /// Correct predictions over all predictions, 0 when empty.
    pub fn accuracy(&self) -> f64 {
        let correct: u64 = (0..self.class_count()).map(|c| u64::from(self.hits(c))).sum();
        ratio(correct as f64, self.total() as f64)
    }

    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Harmonic mean of precision and recall, 0 when both are 0.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}

/// Fraction of matching positions in two parallel label slices.
pub fn accuracy_score(truth: &[usize], predicted: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    hits as f64 / truth.len() as f64
}

/// Per-class entry of an [`EvaluationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: u32,
}

/// Serialized evaluation of one model on one labeled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    /// Keyed by class label.
    pub classes: BTreeMap<String, ClassReport>,
    /// Rows are true classes, columns predictions, both in class order
    /// (positive first), i.e. `[[TP, FN], [FP, TN]]` for binary tasks.
    pub confusion_matrix: Vec<Vec<u32>>,
    pub samples: usize,
}

impl EvaluationReport {
    /// Undefined precision or recall (no predictions, no support) is 0.
    pub fn from_predictions(classes: &[String], truth: &[usize], predicted: &[usize]) -> Self {
        let matrix = ConfusionMatrix::from_predictions(classes.len(), truth, predicted);
        let classes = classes
            .iter()
            .enumerate()
            .map(|(idx, label)| {
                let hits = f64::from(matrix.hits(idx));
                let precision = ratio(hits, f64::from(matrix.predicted(idx)));
                let recall = ratio(hits, f64::from(matrix.support(idx)));
                let report = ClassReport {
                    label: label.clone(),
                    precision,
                    recall,
                    f1_score: f1_score(precision, recall),
                    support: matrix.support(idx),
                };
                (label.clone(), report)
            })
            .collect();
        Self {
            accuracy: matrix.accuracy(),
            classes,
            confusion_matrix: matrix.rows().to_vec(),
            samples: matrix.total() as usize,
        }
    }

    pub fn class(&self, label: &str) -> Option<&ClassReport> {
        self.classes.get(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["melon".to_string(), "non_melon".to_string()]
    }

    #[test]
    fn binary_report_matches_hand_counts() {
        // TP=3, FN=1, FP=2, TN=4
        let truth = [0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let pred = [0, 0, 0, 1, 0, 0, 1, 1, 1, 1];
        let report = EvaluationReport::from_predictions(&classes(), &truth, &pred);
        assert_eq!(report.confusion_matrix, vec![vec![3, 1], vec![2, 4]]);
        assert_eq!(report.samples, 10);
        assert!((report.accuracy - 0.7).abs() < 1e-9);
        let melon = report.class("melon").unwrap();
        assert!((melon.precision - 0.6).abs() < 1e-9);
        assert!((melon.recall - 0.75).abs() < 1e-9);
        assert!((melon.f1_score - 2.0 * 0.6 * 0.75 / 1.35).abs() < 1e-9);
        assert_eq!(melon.support, 4);
        assert_eq!(report.class("non_melon").unwrap().support, 6);
    }

    #[test]
    fn undefined_ratios_are_zero() {
        let truth = [1, 1, 1];
        let pred = [1, 1, 1];
        let report = EvaluationReport::from_predictions(&classes(), &truth, &pred);
        let melon = report.class("melon").unwrap();
        assert_eq!((melon.precision, melon.recall, melon.f1_score), (0.0, 0.0, 0.0));
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn out_of_range_labels_are_ignored() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(0, 5);
        matrix.record(4, 0);
        matrix.record(1, 1);
        assert_eq!(matrix.total(), 1);
        assert_eq!(matrix.predicted(1), 1);
        assert_eq!(accuracy_score(&[0, 1], &[0, 0]), 0.5);
    }
}
