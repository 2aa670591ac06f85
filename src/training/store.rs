//! Metrics & Versioning Store: model artifacts, metadata history and
//! aggregate metric documents, all kept in the blob store.
//!
//! Aggregates are read through the injected [`MetricsCache`]; every write
//! forgets the cache keys it affects.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::blob::{BlobError, BlobStore, Visibility, join_key};
use crate::cache::MetricsCache;
use crate::dataset::TaskType;
use crate::ml::cross_validation::CrossValidationResult;
use crate::ml::learning_curve::LearningCurve;
use crate::ml::metrics::EvaluationReport;
use crate::ml::{ScaledModel, StandardScaler, TrainedModel};

const HISTORY_DIR: &str = "history";
const PERFORMANCE_HISTORY_FILE: &str = "performance_history.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("Invalid JSON in {key}: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },
    #[error("Failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    /// An artifact parsed but cannot be used as stored.
    #[error("Unusable artifact {key}: {reason}")]
    InvalidArtifact { key: String, reason: String },
}

/// `applied` flag and ratio of the balance step, as recorded in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UndersamplingInfo {
    pub applied: bool,
    pub max_imbalance_ratio: f64,
}

/// The `{key}_meta.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_key: String,
    pub task_type: TaskType,
    pub version: u32,
    /// RFC 3339.
    pub trained_at: String,
    pub algorithm: String,
    pub hyperparameters: BTreeMap<String, Value>,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub scaler_class: String,
    pub training_samples_count: usize,
    pub training_accuracy: f64,
    pub initial_distribution: BTreeMap<String, usize>,
    pub final_distribution: BTreeMap<String, usize>,
    pub undersampling: UndersamplingInfo,
    #[serde(default)]
    pub feature_digest: Option<String>,
}

/// Held-out validation of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationBundle {
    pub model_key: String,
    pub validation_samples_count: usize,
    pub metrics: EvaluationReport,
    pub learning_curve_data: LearningCurve,
}

/// One model's entry in `all_{task}_metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub version: u32,
    pub algorithm: String,
    pub training_accuracy: f64,
    /// `None` when no validation data was available.
    pub validation: Option<ValidationBundle>,
    #[serde(default)]
    pub cross_validation: Option<CrossValidationResult>,
}

/// Aggregate of every model trained in one run, keyed by model key.
pub type AllMetrics = BTreeMap<String, ModelMetrics>;

/// Test-split evaluation keyed by model key.
pub type TestResults = BTreeMap<String, EvaluationReport>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub model_key: String,
    pub version: u32,
    pub metrics: Option<EvaluationReport>,
    pub timestamp: String,
}

/// Current UTC time as RFC 3339.
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Typed access to everything persisted under the models prefix.
pub struct ModelStore<'a> {
    store: &'a dyn BlobStore,
    cache: &'a dyn MetricsCache,
    models_dir: String,
    visibility: Visibility,
    history_limit: usize,
}

impl<'a> ModelStore<'a> {
    pub fn new(store: &'a dyn BlobStore, cache: &'a dyn MetricsCache, models_dir: &str) -> Self {
        Self {
            store,
            cache,
            models_dir: models_dir.to_string(),
            visibility: Visibility::Private,
            history_limit: 100,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn model_artifact_key(&self, model_key: &str) -> String {
        self.key(&format!("{model_key}.model"))
    }

    pub fn scaler_key(&self, model_key: &str) -> String {
        self.key(&format!("{model_key}_scaler.json"))
    }

    pub fn metadata_key(&self, model_key: &str) -> String {
        self.key(&format!("{model_key}_meta.json"))
    }

    pub fn metadata_history_key(&self, model_key: &str, version: u32) -> String {
        self.key(&format!("{HISTORY_DIR}/{model_key}_v{version}_meta.json"))
    }

    pub fn learning_curve_key(&self, model_key: &str) -> String {
        self.key(&format!("{model_key}_learning_curve.json"))
    }

    pub fn cross_validation_key(&self, model_key: &str) -> String {
        self.key(&format!("{model_key}_cv_scores.json"))
    }

    pub fn all_metrics_key(&self, task: TaskType) -> String {
        self.key(&format!("all_{task}_metrics.json"))
    }

    pub fn test_results_key(&self, task: TaskType) -> String {
        self.key(&format!("all_{task}_test_results.json"))
    }

    pub fn performance_history_key(&self) -> String {
        self.key(PERFORMANCE_HISTORY_FILE)
    }

    fn key(&self, name: &str) -> String {
        join_key(&self.models_dir, name)
    }

    pub fn load_metadata(&self, model_key: &str) -> Result<Option<ModelMetadata>, StoreError> {
        let cache_key = meta_cache_key(model_key);
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(meta) = serde_json::from_value(value) {
                return Ok(Some(meta));
            }
            self.cache.forget(&cache_key);
        }
        let meta: Option<ModelMetadata> = self.read_json(&self.metadata_key(model_key))?;
        if let Some(meta) = &meta {
            if let Ok(value) = serde_json::to_value(meta) {
                self.cache.put(&cache_key, value);
            }
        }
        Ok(meta)
    }

    /// Version the next training of `model_key` gets; 1 if it was never trained.
    pub fn next_version(&self, model_key: &str) -> Result<u32, StoreError> {
        Ok(self
            .load_metadata(model_key)?
            .map_or(1, |meta| meta.version.saturating_add(1)))
    }

    /// Persist model, paired scaler, active metadata and its history copy.
    pub fn save_model(&self, meta: &ModelMetadata, model: &ScaledModel) -> Result<(), StoreError> {
        let model_key = meta.model_key.as_str();
        self.write_json(&self.model_artifact_key(model_key), model.model())?;
        self.write_json(&self.scaler_key(model_key), model.scaler())?;
        self.write_json(&self.metadata_key(model_key), meta)?;
        self.write_json(&self.metadata_history_key(model_key, meta.version), meta)?;
        self.invalidate_model(model_key);
        info!(model_key, version = meta.version, "Saved model artifacts");
        Ok(())
    }

    /// Load a model together with its own scaler. `None` when the model was never saved.
    pub fn load_model(&self, model_key: &str) -> Result<Option<ScaledModel>, StoreError> {
        let model_key_path = self.model_artifact_key(model_key);
        let Some(model) = self.read_json::<TrainedModel>(&model_key_path)? else {
            return Ok(None);
        };
        let scaler_key = self.scaler_key(model_key);
        let Some(scaler) = self.read_json::<StandardScaler>(&scaler_key)? else {
            return Err(StoreError::InvalidArtifact {
                key: scaler_key,
                reason: "paired scaler is missing".to_string(),
            });
        };
        ScaledModel::new(model, scaler)
            .map(Some)
            .map_err(|reason| StoreError::InvalidArtifact {
                key: model_key_path,
                reason,
            })
    }

    pub fn save_learning_curve(&self, model_key: &str, curve: &LearningCurve) -> Result<(), StoreError> {
        self.write_json(&self.learning_curve_key(model_key), curve)
    }

    pub fn load_learning_curve(&self, model_key: &str) -> Result<Option<LearningCurve>, StoreError> {
        self.read_json(&self.learning_curve_key(model_key))
    }

    pub fn save_cross_validation(
        &self,
        model_key: &str,
        result: &CrossValidationResult,
    ) -> Result<(), StoreError> {
        self.write_json(&self.cross_validation_key(model_key), result)
    }

    pub fn load_cross_validation(
        &self,
        model_key: &str,
    ) -> Result<Option<CrossValidationResult>, StoreError> {
        self.read_json(&self.cross_validation_key(model_key))
    }

    /// Drop cached aggregates for `task`; called when a training run starts.
    pub fn invalidate_task(&self, task: TaskType) {
        self.cache.forget(&all_metrics_cache_key(task));
        self.cache.forget(&test_results_cache_key(task));
    }

    /// Drop cached documents derived from one model.
    pub fn invalidate_model(&self, model_key: &str) {
        self.cache.forget(&meta_cache_key(model_key));
    }

    /// Replace the aggregate for `task` with `metrics`.
    pub fn save_all_metrics(&self, task: TaskType, metrics: &AllMetrics) -> Result<(), StoreError> {
        self.cache.forget(&all_metrics_cache_key(task));
        self.write_json(&self.all_metrics_key(task), metrics)
    }

    pub fn load_all_metrics(&self, task: TaskType) -> Result<Option<AllMetrics>, StoreError> {
        self.cached_read(&all_metrics_cache_key(task), &self.all_metrics_key(task))
    }

    pub fn save_test_results(&self, task: TaskType, results: &TestResults) -> Result<(), StoreError> {
        self.cache.forget(&test_results_cache_key(task));
        self.write_json(&self.test_results_key(task), results)
    }

    pub fn load_test_results(&self, task: TaskType) -> Result<Option<TestResults>, StoreError> {
        self.cached_read(&test_results_cache_key(task), &self.test_results_key(task))
    }

    pub fn load_performance_history(&self) -> Result<Vec<PerformanceEntry>, StoreError> {
        Ok(self
            .read_json(&self.performance_history_key())?
            .unwrap_or_default())
    }

    /// Append entries (newest last) and drop the oldest beyond the limit.
    pub fn append_performance_history(&self, entries: Vec<PerformanceEntry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut history = match self.load_performance_history() {
            Ok(history) => history,
            Err(StoreError::Json { key, source }) => {
                warn!(key, "Discarding unreadable performance history: {source}");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        history.extend(entries);
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        self.write_json(&self.performance_history_key(), &history)
    }

    fn cached_read<T>(&self, cache_key: &str, key: &str) -> Result<Option<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(value) = self.cache.get(cache_key) {
            match serde_json::from_value(value) {
                Ok(parsed) => {
                    debug!(cache_key, "Metrics cache hit");
                    return Ok(Some(parsed));
                }
                Err(_) => self.cache.forget(cache_key),
            }
        }
        let parsed: Option<T> = self.read_json(key)?;
        if let Some(parsed) = &parsed {
            if let Ok(value) = serde_json::to_value(parsed) {
                self.cache.put(cache_key, value);
            }
        }
        Ok(parsed)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            })
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, &bytes, self.visibility)?;
        Ok(())
    }
}

fn meta_cache_key(model_key: &str) -> String {
    format!("{model_key}_meta")
}

fn all_metrics_cache_key(task: TaskType) -> String {
    format!("all_{task}_metrics")
}

fn test_results_cache_key(task: TaskType) -> String {
    format!("all_{task}_test_results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::cache::InMemoryCache;
    use crate::dataset::LabeledDataset;
    use crate::ml::Estimator;
    use crate::ml::gaussian_nb::GaussianNbOptions;

    fn fitted() -> ScaledModel {
        let mut data = LabeledDataset::for_task(TaskType::Detector);
        for i in 0..10 {
            let t = i as f32 * 0.1;
            data.push(vec![5.0 + t; 8], 0);
            data.push(vec![-5.0 - t; 8], 1);
        }
        Estimator::GaussianNb(GaussianNbOptions::default())
            .fit_scaled(&data)
            .unwrap()
    }

    fn metadata(version: u32) -> ModelMetadata {
        ModelMetadata {
            model_key: "gaussian_nb_detector".to_string(),
            task_type: TaskType::Detector,
            version,
            trained_at: timestamp(),
            algorithm: "gaussian_nb".to_string(),
            hyperparameters: BTreeMap::new(),
            feature_count: 8,
            feature_names: TaskType::Detector.feature_names(),
            scaler_class: StandardScaler::CLASS_NAME.to_string(),
            training_samples_count: 20,
            training_accuracy: 1.0,
            initial_distribution: BTreeMap::new(),
            final_distribution: BTreeMap::new(),
            undersampling: UndersamplingInfo {
                applied: false,
                max_imbalance_ratio: 2.0,
            },
            feature_digest: None,
        }
    }

    #[test]
    fn versions_start_at_one_and_increment() {
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryCache::new();
        let store = ModelStore::new(&blobs, &cache, "models");
        assert_eq!(store.next_version("gaussian_nb_detector").unwrap(), 1);
        store.save_model(&metadata(1), &fitted()).unwrap();
        assert_eq!(store.next_version("gaussian_nb_detector").unwrap(), 2);
        store.save_model(&metadata(2), &fitted()).unwrap();
        assert_eq!(store.next_version("gaussian_nb_detector").unwrap(), 3);
        assert!(blobs.exists("models/history/gaussian_nb_detector_v1_meta.json").unwrap());
        assert!(blobs.exists("models/history/gaussian_nb_detector_v2_meta.json").unwrap());
    }

    #[test]
    fn model_reloads_with_its_scaler() {
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryCache::new();
        let store = ModelStore::new(&blobs, &cache, "models");
        let model = fitted();
        store.save_model(&metadata(1), &model).unwrap();
        let loaded = store.load_model("gaussian_nb_detector").unwrap().unwrap();
        assert_eq!(loaded, model);
        assert!(store.load_model("knn_detector").unwrap().is_none());
    }

    #[test]
    fn model_without_scaler_is_rejected() {
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryCache::new();
        let store = ModelStore::new(&blobs, &cache, "models");
        let bytes = serde_json::to_vec(fitted().model()).unwrap();
        blobs
            .put("models/orphan_detector.model", &bytes, Visibility::Private)
            .unwrap();
        let err = store.load_model("orphan_detector").unwrap_err();
        assert!(matches!(err, StoreError::InvalidArtifact { .. }));
    }

    #[test]
    fn aggregate_reads_go_through_cache_and_writes_invalidate() {
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryCache::new();
        let store = ModelStore::new(&blobs, &cache, "models");
        assert!(store.load_all_metrics(TaskType::Detector).unwrap().is_none());

        let mut metrics = AllMetrics::new();
        metrics.insert(
            "gaussian_nb_detector".to_string(),
            ModelMetrics {
                version: 1,
                algorithm: "gaussian_nb".to_string(),
                training_accuracy: 0.9,
                validation: None,
                cross_validation: None,
            },
        );
        store.save_all_metrics(TaskType::Detector, &metrics).unwrap();
        assert_eq!(store.load_all_metrics(TaskType::Detector).unwrap(), Some(metrics.clone()));
        assert!(cache.get("all_detector_metrics").is_some());

        store.invalidate_task(TaskType::Detector);
        assert!(cache.get("all_detector_metrics").is_none());

        metrics.clear();
        store.save_all_metrics(TaskType::Detector, &metrics).unwrap();
        assert_eq!(store.load_all_metrics(TaskType::Detector).unwrap(), Some(AllMetrics::new()));
    }

    #[test]
    fn performance_history_is_capped_newest_last() {
        let blobs = MemoryBlobStore::new();
        let cache = InMemoryCache::new();
        let store = ModelStore::new(&blobs, &cache, "models").with_history_limit(3);
        for version in 1..=5 {
            store
                .append_performance_history(vec![PerformanceEntry {
                    model_key: "gaussian_nb_detector".to_string(),
                    version,
                    metrics: None,
                    timestamp: timestamp(),
                }])
                .unwrap();
        }
        let history = store.load_performance_history().unwrap();
        let versions: Vec<u32> = history.iter().map(|entry| entry.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let stamp = timestamp();
        assert!(stamp.ends_with('Z'), "{stamp}");
        assert_eq!(stamp.as_bytes()[10], b'T', "{stamp}");
    }
}
