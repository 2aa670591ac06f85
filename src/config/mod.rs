//! Pipeline configuration persisted as TOML.
//!
//! Every field carries a serde default so a partial (or missing) file still
//! yields a usable configuration.

mod defaults;
mod load;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::Visibility;
use defaults::*;

pub use load::{CONFIG_FILE_NAME, config_path, load_from, load_or_default, save_to_path};

/// Errors that may occur while loading or saving pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The application directory could not be resolved.
    #[error(transparent)]
    AppDir(#[from] crate::app_dirs::AppDirError),
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write a config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the TOML file.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub training: TrainingSettings,
}

/// Where the durable blob store lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// Root directory of the filesystem blob store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Visibility applied to every artifact the pipeline writes.
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            visibility: default_visibility(),
        }
    }
}

/// Blob key prefixes for inputs and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutSettings {
    #[serde(default = "default_annotations_dir")]
    pub annotations_dir: String,
    /// Prefix under which annotated images are stored.
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: String,
    #[serde(default = "default_features_dir")]
    pub features_dir: String,
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            annotations_dir: default_annotations_dir(),
            dataset_dir: default_dataset_dir(),
            features_dir: default_features_dir(),
            models_dir: default_models_dir(),
        }
    }
}

/// Knobs for balancing, cross-validation and learning curves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSettings {
    /// Detector non_melon count may not exceed this multiple of the melon count.
    #[serde(default = "default_max_imbalance_ratio")]
    pub max_imbalance_ratio: f64,
    #[serde(default = "default_k_folds")]
    pub k_folds: usize,
    /// Fixed seed for every random draw; `None` draws from OS entropy.
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default = "default_learning_curve_ratios")]
    pub learning_curve_ratios: Vec<f64>,
    /// Datasets smaller than this produce an empty learning curve.
    #[serde(default = "default_learning_curve_min_samples")]
    pub learning_curve_min_samples: usize,
    #[serde(default = "default_learning_curve_min_train")]
    pub learning_curve_min_train: usize,
    /// Fraction held out at the full-size ratio.
    #[serde(default = "default_learning_curve_holdout")]
    pub learning_curve_holdout: f64,
    #[serde(default = "default_performance_history_limit")]
    pub performance_history_limit: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            max_imbalance_ratio: default_max_imbalance_ratio(),
            k_folds: default_k_folds(),
            seed: default_seed(),
            learning_curve_ratios: default_learning_curve_ratios(),
            learning_curve_min_samples: default_learning_curve_min_samples(),
            learning_curve_min_train: default_learning_curve_min_train(),
            learning_curve_holdout: default_learning_curve_holdout(),
            performance_history_limit: default_performance_history_limit(),
        }
    }
}

impl PipelineConfig {
    /// Clamp out-of-range values instead of rejecting the file.
    pub fn normalized(mut self) -> Self {
        let training = &mut self.training;
        training.k_folds = training.k_folds.max(MIN_K_FOLDS);
        if !training.max_imbalance_ratio.is_finite() || training.max_imbalance_ratio <= 0.0 {
            training.max_imbalance_ratio = default_max_imbalance_ratio();
        }
        training
            .learning_curve_ratios
            .retain(|ratio| ratio.is_finite() && *ratio > 0.0);
        for ratio in &mut training.learning_curve_ratios {
            *ratio = ratio.min(1.0);
        }
        training
            .learning_curve_ratios
            .sort_by(|a, b| a.total_cmp(b));
        training.learning_curve_ratios.dedup();
        if training.learning_curve_ratios.is_empty() {
            training.learning_curve_ratios = default_learning_curve_ratios();
        }
        training.learning_curve_min_train = training.learning_curve_min_train.max(1);
        if !(0.0..1.0).contains(&training.learning_curve_holdout) {
            training.learning_curve_holdout = default_learning_curve_holdout();
        }
        training.performance_history_limit = training.performance_history_limit.max(1);
        self
    }
}
