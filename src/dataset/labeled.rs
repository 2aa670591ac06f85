//! In-memory labeled samples plus the task/split vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DETECTOR_FEATURE_COUNT: usize = 8;
pub const CLASSIFIER_FEATURE_COUNT: usize = 38;

const COLOR_FEATURE_NAMES: [&str; 6] = ["R_mean", "G_mean", "B_mean", "R_std", "G_std", "B_std"];
const TEXTURE_PROPERTIES: [&str; 4] = ["contrast", "correlation", "energy", "homogeneity"];
pub(crate) const GLCM_ANGLES: [u32; 4] = [0, 45, 90, 135];
pub(crate) const GLCM_DISTANCES: [usize; 2] = [1, 3];

/// Which binary problem a feature file or model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Melon present vs. absent, one row per image.
    Detector,
    /// Ripe vs. unripe, one row per bounding box.
    Classifier,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::Detector, TaskType::Classifier];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Detector => "detector",
            TaskType::Classifier => "classifier",
        }
    }

    /// Label stored at class index 0.
    pub fn positive_label(self) -> &'static str {
        match self {
            TaskType::Detector => "melon",
            TaskType::Classifier => "ripe",
        }
    }

    /// Label stored at class index 1.
    pub fn negative_label(self) -> &'static str {
        match self {
            TaskType::Detector => "non_melon",
            TaskType::Classifier => "unripe",
        }
    }

    pub fn labels(self) -> [&'static str; 2] {
        [self.positive_label(), self.negative_label()]
    }

    /// Map a raw label (any case, surrounding whitespace) to its class index.
    pub fn label_index(self, raw: &str) -> Option<usize> {
        let label = raw.trim().to_ascii_lowercase();
        self.labels().iter().position(|candidate| *candidate == label)
    }

    pub fn feature_count(self) -> usize {
        match self {
            TaskType::Detector => DETECTOR_FEATURE_COUNT,
            TaskType::Classifier => CLASSIFIER_FEATURE_COUNT,
        }
    }

    /// Semantic names of each feature column, in file order.
    pub fn feature_names(self) -> Vec<String> {
        let mut names: Vec<String> = COLOR_FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        match self {
            TaskType::Detector => {
                names.push("aspect_ratio".to_string());
                names.push("circularity".to_string());
            }
            TaskType::Classifier => {
                for distance_idx in 1..=GLCM_DISTANCES.len() {
                    for angle in GLCM_ANGLES {
                        for property in TEXTURE_PROPERTIES {
                            names.push(format!("{property}{angle}_{distance_idx}"));
                        }
                    }
                }
            }
        }
        names
    }

    /// Name of the identifier column in the feature file.
    pub fn id_column(self) -> &'static str {
        match self {
            TaskType::Detector => "filename",
            TaskType::Classifier => "annotation_id",
        }
    }

    /// Prefix of the numbered feature columns (`df1..df8`, `cf1..cf38`).
    pub fn column_prefix(self) -> &'static str {
        match self {
            TaskType::Detector => "df",
            TaskType::Classifier => "cf",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSplit {
    Train,
    Valid,
    Test,
}

impl DatasetSplit {
    pub const ALL: [DatasetSplit; 3] = [DatasetSplit::Train, DatasetSplit::Valid, DatasetSplit::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Valid => "valid",
            DatasetSplit::Test => "test",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature rows with parallel class indices.
///
/// `classes[y[i]]` is the label of row `x[i]`; class 0 is the positive label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    pub classes: Vec<String>,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

impl LabeledDataset {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            x: Vec::new(),
            y: Vec::new(),
        }
    }

    /// Empty dataset with the task's `[positive, negative]` classes.
    pub fn for_task(task: TaskType) -> Self {
        Self::new(task.labels().iter().map(|s| s.to_string()).collect())
    }

    pub fn push(&mut self, row: Vec<f32>, label: usize) {
        self.x.push(row);
        self.y.push(label);
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn feature_len(&self) -> usize {
        self.x.first().map(|row| row.len()).unwrap_or(0)
    }

    /// Per-class sample counts, indexed like `classes`.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for &label in &self.y {
            if let Some(count) = counts.get_mut(label) {
                *count += 1;
            }
        }
        counts
    }

    /// Class counts keyed by label name, for metadata documents.
    pub fn distribution(&self) -> BTreeMap<String, usize> {
        self.classes
            .iter()
            .cloned()
            .zip(self.class_counts())
            .collect()
    }

    pub fn distinct_labels(&self) -> usize {
        self.class_counts().iter().filter(|&&count| count > 0).count()
    }

    /// Copy the rows at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.classes.clone());
        for &idx in indices {
            out.push(self.x[idx].clone(), self.y[idx]);
        }
        out
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.x.len() != self.y.len() {
            return Err("Mismatched X/Y lengths".to_string());
        }
        let dim = self.feature_len();
        if self.x.iter().any(|row| row.len() != dim) {
            return Err("Inconsistent feature row length".to_string());
        }
        if self.y.iter().any(|&label| label >= self.classes.len()) {
            return Err("Label index out of range".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_match_declared_counts() {
        let detector = TaskType::Detector.feature_names();
        assert_eq!(detector.len(), DETECTOR_FEATURE_COUNT);
        assert_eq!(detector[7], "circularity");

        let classifier = TaskType::Classifier.feature_names();
        assert_eq!(classifier.len(), CLASSIFIER_FEATURE_COUNT);
        assert_eq!(classifier[6], "contrast0_1");
        assert_eq!(classifier[9], "homogeneity0_1");
        assert_eq!(classifier[37], "homogeneity135_2");
    }

    #[test]
    fn label_index_is_case_insensitive() {
        assert_eq!(TaskType::Detector.label_index(" Melon "), Some(0));
        assert_eq!(TaskType::Detector.label_index("non_melon"), Some(1));
        assert_eq!(TaskType::Classifier.label_index("RIPE"), Some(0));
        assert_eq!(TaskType::Classifier.label_index("melon"), None);
    }

    #[test]
    fn distribution_and_subset() {
        let mut data = LabeledDataset::for_task(TaskType::Detector);
        data.push(vec![1.0], 0);
        data.push(vec![2.0], 1);
        data.push(vec![3.0], 1);
        assert_eq!(data.class_counts(), vec![1, 2]);
        assert_eq!(data.distribution()["non_melon"], 2);
        let sub = data.subset(&[2, 0]);
        assert_eq!(sub.x, vec![vec![3.0], vec![1.0]]);
        assert_eq!(sub.y, vec![1, 0]);
        assert_eq!(sub.distinct_labels(), 2);
        data.validate().unwrap();
    }
}
