use std::path::PathBuf;

use crate::blob::Visibility;

pub(super) const MIN_K_FOLDS: usize = 2;

pub(super) fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

pub(super) fn default_visibility() -> Visibility {
    Visibility::Private
}

pub(super) fn default_annotations_dir() -> String {
    "dataset/annotations".to_string()
}

pub(super) fn default_dataset_dir() -> String {
    "dataset".to_string()
}

pub(super) fn default_features_dir() -> String {
    "dataset/features".to_string()
}

pub(super) fn default_models_dir() -> String {
    "models".to_string()
}

pub(super) fn default_max_imbalance_ratio() -> f64 {
    2.0
}

pub(super) fn default_k_folds() -> usize {
    5
}

pub(super) fn default_seed() -> Option<u64> {
    Some(12_345)
}

pub(super) fn default_learning_curve_ratios() -> Vec<f64> {
    vec![0.2, 0.4, 0.6, 0.8, 1.0]
}

pub(super) fn default_learning_curve_min_samples() -> usize {
    10
}

pub(super) fn default_learning_curve_min_train() -> usize {
    5
}

pub(super) fn default_learning_curve_holdout() -> f64 {
    0.1
}

pub(super) fn default_performance_history_limit() -> usize {
    100
}
