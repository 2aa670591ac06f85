//! Per-Model Training & Scaling Orchestrator.
//!
//! For each task: load the train split, balance it (detector only), then for
//! every catalog entry fit a scaler on the uncorrected rows, train on the
//! corrected rows, persist, validate and optionally cross-validate. One
//! algorithm failing never stops the others.

use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{error, info, warn};

use super::store::{
    AllMetrics, ModelMetadata, ModelMetrics, ModelStore, PerformanceEntry, StoreError,
    TestResults, UndersamplingInfo, ValidationBundle, timestamp,
};
use crate::blob::{BlobStore, Visibility};
use crate::cache::MetricsCache;
use crate::config::{LayoutSettings, TrainingSettings};
use crate::dataset::features::{FeatureStoreError, LoadedFeatures, feature_file_key, load_features};
use crate::dataset::{DatasetSplit, LabeledDataset, TaskType};
use crate::events::{EventStatus, ProgressSink, percent};
use crate::ml::balance::{BalanceOutcome, BalanceReport, rng_for, undersample};
use crate::ml::cross_validation::{CrossValidationResult, cross_validate};
use crate::ml::learning_curve::{LearningCurveOptions, learning_curve};
use crate::ml::metrics::EvaluationReport;
use crate::ml::{Estimator, Hyperparameters, ScaledModel, StandardScaler};

/// Longest failure message kept in reports and logs.
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Features(#[from] FeatureStoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No {task} training data")]
    EmptyTrainingSet { task: TaskType },
    #[error("{task} training data has {classes} class(es); need two")]
    SingleClass { task: TaskType, classes: usize },
    #[error("{model_key}: {message}")]
    Estimator { model_key: String, message: String },
    #[error("No {task} model could be trained ({failed} failed)")]
    NoModelTrained { task: TaskType, failed: usize },
}

/// Optional stages of a training run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub with_cv: bool,
    pub with_test: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Trained {
        model_key: String,
        algorithm: String,
        version: u32,
        training_accuracy: f64,
        validation: Option<ValidationBundle>,
        cross_validation: Option<CrossValidationResult>,
    },
    Failed {
        model_key: String,
        message: String,
    },
}

impl ModelOutcome {
    pub fn model_key(&self) -> &str {
        match self {
            ModelOutcome::Trained { model_key, .. } | ModelOutcome::Failed { model_key, .. } => {
                model_key
            }
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, ModelOutcome::Trained { .. })
    }
}

/// Everything one task's run produced.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: TaskType,
    pub balance: BalanceReport,
    pub models: Vec<ModelOutcome>,
    /// `None` unless test evaluation was requested and test data existed.
    pub test_results: Option<TestResults>,
}

impl TaskReport {
    pub fn trained(&self) -> usize {
        self.models.iter().filter(|outcome| outcome.is_trained()).count()
    }

    pub fn failed(&self) -> usize {
        self.models.len() - self.trained()
    }

    pub fn outcome(&self, model_key: &str) -> Option<&ModelOutcome> {
        self.models
            .iter()
            .find(|outcome| outcome.model_key() == model_key)
    }
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed(TaskReport),
    Failed { task: TaskType, error: TrainingError },
}

#[derive(Debug, Default)]
pub struct TrainingReport {
    pub tasks: Vec<TaskOutcome>,
}

impl TrainingReport {
    pub fn any_succeeded(&self) -> bool {
        self.tasks
            .iter()
            .any(|outcome| matches!(outcome, TaskOutcome::Completed(_)))
    }

    pub fn report(&self, task: TaskType) -> Option<&TaskReport> {
        self.tasks.iter().find_map(|outcome| match outcome {
            TaskOutcome::Completed(report) if report.task == task => Some(report),
            _ => None,
        })
    }
}

/// Trains the algorithm catalog for one or more tasks.
pub struct Trainer<'a> {
    store: &'a dyn BlobStore,
    cache: &'a dyn MetricsCache,
    sink: &'a dyn ProgressSink,
    layout: LayoutSettings,
    settings: TrainingSettings,
    visibility: Visibility,
    catalog: Option<Vec<Estimator>>,
}

impl<'a> Trainer<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        cache: &'a dyn MetricsCache,
        sink: &'a dyn ProgressSink,
        layout: LayoutSettings,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            store,
            cache,
            sink,
            layout,
            settings,
            visibility: Visibility::Private,
            catalog: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Train these estimators instead of the task's full catalog.
    pub fn with_catalog(mut self, catalog: Vec<Estimator>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn model_store(&self) -> ModelStore<'a> {
        ModelStore::new(self.store, self.cache, &self.layout.models_dir)
            .with_visibility(self.visibility)
            .with_history_limit(self.settings.performance_history_limit)
    }

    fn catalog(&self, task: TaskType) -> Vec<Estimator> {
        self.catalog
            .clone()
            .unwrap_or_else(|| Estimator::catalog(task))
    }

    /// Train every requested task in order.
    pub fn run(&self, tasks: &[TaskType], options: RunOptions) -> TrainingReport {
        let mut report = TrainingReport::default();
        for &task in tasks {
            match self.train_task(task, options) {
                Ok(task_report) => report.tasks.push(TaskOutcome::Completed(task_report)),
                Err(error) => report.tasks.push(TaskOutcome::Failed { task, error }),
            }
        }
        report
    }

    /// Train the catalog for `task`; `Err` only when no model could be trained.
    pub fn train_task(&self, task: TaskType, options: RunOptions) -> Result<TaskReport, TrainingError> {
        self.sink
            .status(EventStatus::Start, &format!("Training {task} models"));
        match self.train_task_inner(task, options) {
            Ok(report) => {
                self.sink.status(
                    EventStatus::Done,
                    &format!(
                        "{task}: {} model(s) trained, {} failed",
                        report.trained(),
                        report.failed()
                    ),
                );
                Ok(report)
            }
            Err(err) => {
                error!(task = %task, "Training failed: {err}");
                self.sink.status(EventStatus::Error, &err.to_string());
                Err(err)
            }
        }
    }

    fn train_task_inner(&self, task: TaskType, options: RunOptions) -> Result<TaskReport, TrainingError> {
        let models = self.model_store();
        models.invalidate_task(task);

        let train = self.load_split(task, DatasetSplit::Train)?;
        let full = &train.dataset;
        if full.is_empty() {
            return Err(TrainingError::EmptyTrainingSet { task });
        }
        if full.distinct_labels() < 2 {
            return Err(TrainingError::SingleClass {
                task,
                classes: full.distinct_labels(),
            });
        }
        self.sink.log(&format!(
            "Loaded {} {task} training samples: {:?}",
            full.len(),
            full.distribution()
        ));

        let mut rng = rng_for(self.settings.seed);
        let balance = match task {
            TaskType::Detector => undersample(full, self.settings.max_imbalance_ratio, &mut rng),
            TaskType::Classifier => BalanceOutcome {
                dataset: full.clone(),
                report: BalanceReport {
                    applied: false,
                    max_imbalance_ratio: self.settings.max_imbalance_ratio,
                    initial_distribution: full.distribution(),
                    final_distribution: full.distribution(),
                },
            },
        };
        if balance.dataset.distinct_labels() < 2 {
            return Err(TrainingError::SingleClass {
                task,
                classes: balance.dataset.distinct_labels(),
            });
        }
        if balance.report.applied {
            self.sink.log(&format!(
                "Undersampled {task} training set to {:?}",
                balance.report.final_distribution
            ));
        }

        let catalog = self.catalog(task);
        let total = catalog.len();
        let mut outcomes = Vec::with_capacity(total);
        for (idx, estimator) in catalog.iter().enumerate() {
            let model_key = estimator.model_key(task);
            let context = TrainingContext {
                task,
                full,
                corrected: &balance.dataset,
                balance: &balance.report,
                digest: train.digest.as_deref(),
            };
            let outcome = match self.train_model(&models, estimator, &context, options, &mut rng) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let message = truncate_message(&err.to_string(), MAX_ERROR_CHARS);
                    error!(model_key, "Model training failed: {message}");
                    self.sink.log(&format!("Error training {model_key}: {message}"));
                    ModelOutcome::Failed {
                        model_key: model_key.clone(),
                        message,
                    }
                }
            };
            outcomes.push(outcome);
            self.sink.progress(
                percent(idx + 1, total),
                &format!("Finished {model_key} - {}/{total}", idx + 1),
            );
        }

        let trained = outcomes.iter().filter(|outcome| outcome.is_trained()).count();
        if trained == 0 {
            return Err(TrainingError::NoModelTrained {
                task,
                failed: outcomes.len(),
            });
        }

        let all_metrics: AllMetrics = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ModelOutcome::Trained {
                    model_key,
                    algorithm,
                    version,
                    training_accuracy,
                    validation,
                    cross_validation,
                } => Some((
                    model_key.clone(),
                    ModelMetrics {
                        version: *version,
                        algorithm: algorithm.clone(),
                        training_accuracy: *training_accuracy,
                        validation: validation.clone(),
                        cross_validation: cross_validation.clone(),
                    },
                )),
                ModelOutcome::Failed { .. } => None,
            })
            .collect();
        models.save_all_metrics(task, &all_metrics)?;

        let test_results = if options.with_test {
            self.evaluate_test_split(&models, task, &outcomes)?
        } else {
            None
        };

        let stamp = timestamp();
        let history = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ModelOutcome::Trained {
                    model_key,
                    version,
                    validation,
                    ..
                } => Some(PerformanceEntry {
                    model_key: model_key.clone(),
                    version: *version,
                    metrics: validation.as_ref().map(|bundle| bundle.metrics.clone()),
                    timestamp: stamp.clone(),
                }),
                ModelOutcome::Failed { .. } => None,
            })
            .collect();
        if let Err(err) = models.append_performance_history(history) {
            warn!(task = %task, "Failed to update performance history: {err}");
        }

        info!(task = %task, trained, failed = outcomes.len() - trained, "Training run finished");
        Ok(TaskReport {
            task,
            balance: balance.report,
            models: outcomes,
            test_results,
        })
    }

    fn train_model(
        &self,
        models: &ModelStore<'_>,
        estimator: &Estimator,
        context: &TrainingContext<'_>,
        options: RunOptions,
        rng: &mut StdRng,
    ) -> Result<ModelOutcome, TrainingError> {
        let task = context.task;
        let model_key = estimator.model_key(task);
        let estimator_error = |message: String| TrainingError::Estimator {
            model_key: model_key.clone(),
            message,
        };
        info!(model_key, "Training model");
        self.sink.log(&format!("Training {}", estimator.display_name()));

        // Scaler statistics come from the uncorrected population.
        let scaler = StandardScaler::fit(context.full).map_err(estimator_error)?;
        let fitted = estimator
            .fit_with_scaler(scaler, context.corrected)
            .map_err(estimator_error)?;
        let training_accuracy = fitted.accuracy(context.corrected).map_err(estimator_error)?;

        let version = models.next_version(&model_key)?;
        let meta = ModelMetadata {
            model_key: model_key.clone(),
            task_type: task,
            version,
            trained_at: timestamp(),
            algorithm: estimator.key().to_string(),
            hyperparameters: estimator.describe_hyperparameters(),
            feature_count: task.feature_count(),
            feature_names: task.feature_names(),
            scaler_class: StandardScaler::CLASS_NAME.to_string(),
            training_samples_count: context.corrected.len(),
            training_accuracy,
            initial_distribution: context.balance.initial_distribution.clone(),
            final_distribution: context.balance.final_distribution.clone(),
            undersampling: UndersamplingInfo {
                applied: context.balance.applied,
                max_imbalance_ratio: context.balance.max_imbalance_ratio,
            },
            feature_digest: context.digest.map(str::to_string),
        };
        models.save_model(&meta, &fitted)?;

        let validation = self.validate(task, estimator, &fitted, rng);
        if let Some(bundle) = &validation {
            if !bundle.learning_curve_data.is_empty() {
                models.save_learning_curve(&model_key, &bundle.learning_curve_data)?;
            }
            self.sink.log(&format!(
                "{model_key} validation accuracy: {:.4}",
                bundle.metrics.accuracy
            ));
        } else {
            self.sink.log(&format!("{model_key}: validation unavailable"));
        }

        let cross_validation = if options.with_cv {
            let result = cross_validate(estimator, context.corrected, self.settings.k_folds, rng);
            models.save_cross_validation(&model_key, &result)?;
            Some(result)
        } else {
            None
        };

        models.invalidate_model(&model_key);
        info!(model_key, version, training_accuracy, "Model trained");
        Ok(ModelOutcome::Trained {
            model_key,
            algorithm: estimator.key().to_string(),
            version,
            training_accuracy,
            validation,
            cross_validation,
        })
    }

    /// Evaluate `model` on the validation split, with a learning curve built
    /// from the unscaled validation rows. `None` when there is no usable
    /// validation data.
    pub fn validate(
        &self,
        task: TaskType,
        estimator: &Estimator,
        model: &ScaledModel,
        rng: &mut StdRng,
    ) -> Option<ValidationBundle> {
        let model_key = estimator.model_key(task);
        let loaded = match self.load_split(task, DatasetSplit::Valid) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(model_key, "Validation data unreadable: {err}");
                return None;
            }
        };
        let data = loaded.dataset;
        if data.is_empty() {
            warn!(model_key, "No validation data");
            return None;
        }
        let metrics = match model.evaluate(&data) {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(model_key, "Validation failed: {err}");
                return None;
            }
        };
        let curve_options = LearningCurveOptions::from(&self.settings);
        let learning_curve_data = learning_curve(estimator, &data, &curve_options, rng);
        Some(ValidationBundle {
            model_key,
            validation_samples_count: data.len(),
            metrics,
            learning_curve_data,
        })
    }

    fn evaluate_test_split(
        &self,
        models: &ModelStore<'_>,
        task: TaskType,
        outcomes: &[ModelOutcome],
    ) -> Result<Option<TestResults>, TrainingError> {
        let test = match self.load_split(task, DatasetSplit::Test) {
            Ok(loaded) => loaded.dataset,
            Err(err) => {
                warn!(task = %task, "Test data unreadable: {err}");
                return Ok(None);
            }
        };
        if test.is_empty() {
            warn!(task = %task, "No test data; skipping test evaluation");
            self.sink.log(&format!("No {task} test data"));
            return Ok(None);
        }
        let mut results = TestResults::new();
        for outcome in outcomes.iter().filter(|outcome| outcome.is_trained()) {
            let model_key = outcome.model_key();
            match self.evaluate_stored(models, model_key, &test) {
                Ok(report) => {
                    self.sink.log(&format!(
                        "{model_key} test accuracy: {:.4}",
                        report.accuracy
                    ));
                    results.insert(model_key.to_string(), report);
                }
                Err(err) => {
                    let message = truncate_message(&err.to_string(), MAX_ERROR_CHARS);
                    warn!(model_key, "Test evaluation failed: {message}");
                }
            }
        }
        models.save_test_results(task, &results)?;
        Ok(Some(results))
    }

    fn evaluate_stored(
        &self,
        models: &ModelStore<'_>,
        model_key: &str,
        test: &LabeledDataset,
    ) -> Result<EvaluationReport, TrainingError> {
        let model = models
            .load_model(model_key)?
            .ok_or_else(|| TrainingError::Estimator {
                model_key: model_key.to_string(),
                message: "model artifact missing".to_string(),
            })?;
        model.evaluate(test).map_err(|message| TrainingError::Estimator {
            model_key: model_key.to_string(),
            message,
        })
    }

    fn load_split(&self, task: TaskType, split: DatasetSplit) -> Result<LoadedFeatures, TrainingError> {
        let key = feature_file_key(&self.layout.features_dir, split, task);
        Ok(load_features(self.store, &key, task)?)
    }
}

struct TrainingContext<'d> {
    task: TaskType,
    /// Uncorrected training rows.
    full: &'d LabeledDataset,
    /// Rows the estimators actually train on.
    corrected: &'d LabeledDataset,
    balance: &'d BalanceReport,
    digest: Option<&'d str>,
}

fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &message[..end]),
        None => message.to_string(),
    }
}
