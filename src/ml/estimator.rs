//! The algorithm catalog and the trained-model wrappers built from it.
//!
//! An [`Estimator`] is pure configuration: every call to [`Estimator::train`]
//! builds a fresh model, so folds and learning-curve points never share state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ada_boost::{AdaBoostModel, AdaBoostOptions, train_ada_boost};
use super::gaussian_nb::{GaussianNbModel, GaussianNbOptions, train_gaussian_nb};
use super::knn::{KnnModel, KnnOptions, train_knn};
use super::logit_boost::{LogitBoostModel, LogitBoostOptions, train_logit_boost};
use super::logreg::{self, LogRegModel, train_logreg};
use super::metrics::{EvaluationReport, accuracy_score};
use super::mlp::{self, MlpModel, train_mlp};
use super::scaler::{ScaledDataset, StandardScaler};
use super::tree::{DecisionTree, ForestOptions, RandomForestModel, TreeOptions, train_random_forest, train_tree};
use crate::dataset::{LabeledDataset, TaskType};

/// Explicit hyperparameter listing for metadata documents.
pub trait Hyperparameters {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value>;
}

fn params<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

impl Hyperparameters for GaussianNbOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([("var_smoothing", json!(self.var_smoothing))])
    }
}

impl Hyperparameters for TreeOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("max_depth", json!(self.max_depth)),
            ("min_samples_leaf", json!(self.min_samples_leaf)),
            ("min_impurity_decrease", json!(self.min_impurity_decrease)),
            ("max_features", json!(self.max_features)),
        ])
    }
}

impl Hyperparameters for logreg::TrainOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("epochs", json!(self.epochs)),
            ("learning_rate", json!(self.learning_rate)),
            ("l2_penalty", json!(self.l2)),
            ("batch_size", json!(self.batch_size)),
        ])
    }
}

impl Hyperparameters for AdaBoostOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("estimators", json!(self.rounds)),
            ("learning_rate", json!(self.learning_rate)),
            ("sample_ratio", json!(self.sample_ratio)),
            ("base_max_depth", json!(self.base.max_depth)),
        ])
    }
}

impl Hyperparameters for KnnOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([("k", json!(self.k)), ("weighted", json!(self.weighted))])
    }
}

impl Hyperparameters for LogitBoostOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("estimators", json!(self.rounds)),
            ("learning_rate", json!(self.learning_rate)),
            ("sample_ratio", json!(self.sample_ratio)),
            ("base", json!("regression_stump")),
        ])
    }
}

impl Hyperparameters for mlp::TrainOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("hidden_size", json!(self.hidden_size)),
            ("epochs", json!(self.epochs)),
            ("batch_size", json!(self.batch_size)),
            ("learning_rate", json!(self.learning_rate)),
            ("l2_penalty", json!(self.l2_penalty)),
            ("dropout", json!(self.dropout)),
        ])
    }
}

impl Hyperparameters for ForestOptions {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        params([
            ("estimators", json!(self.n_estimators)),
            ("sample_ratio", json!(self.sample_ratio)),
            ("max_depth", json!(self.tree.max_depth)),
            ("min_samples_leaf", json!(self.tree.min_samples_leaf)),
            ("max_features", json!(self.tree.max_features)),
        ])
    }
}

/// One configured algorithm of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Estimator {
    GaussianNb(GaussianNbOptions),
    ClassificationTree(TreeOptions),
    LogisticRegression(logreg::TrainOptions),
    AdaBoost(AdaBoostOptions),
    KNearestNeighbors(KnnOptions),
    LogitBoost(LogitBoostOptions),
    MultilayerPerceptron(mlp::TrainOptions),
    RandomForest(ForestOptions),
}

impl Estimator {
    /// Every algorithm trained for `task`, in training order.
    pub fn catalog(task: TaskType) -> Vec<Estimator> {
        let (depth, impurity, l2, dropout, mlp_epochs) = match task {
            TaskType::Detector => (8, 0.002, 1e-3, 0.2, 150),
            TaskType::Classifier => (12, 0.001, 5e-4, 0.1, 200),
        };
        let tree = TreeOptions {
            max_depth: depth,
            min_samples_leaf: 3,
            min_impurity_decrease: impurity,
            ..TreeOptions::default()
        };
        vec![
            Estimator::GaussianNb(GaussianNbOptions::default()),
            Estimator::ClassificationTree(tree.clone()),
            Estimator::LogisticRegression(logreg::TrainOptions {
                l2,
                ..logreg::TrainOptions::default()
            }),
            Estimator::AdaBoost(AdaBoostOptions::default()),
            Estimator::KNearestNeighbors(KnnOptions::default()),
            Estimator::LogitBoost(LogitBoostOptions::default()),
            Estimator::MultilayerPerceptron(mlp::TrainOptions {
                dropout,
                l2_penalty: l2,
                epochs: mlp_epochs,
                ..mlp::TrainOptions::default()
            }),
            Estimator::RandomForest(ForestOptions {
                tree: TreeOptions {
                    max_features: Some(4),
                    ..tree
                },
                ..ForestOptions::default()
            }),
        ]
    }

    /// Stable algorithm identifier used in model keys.
    pub fn key(&self) -> &'static str {
        match self {
            Estimator::GaussianNb(_) => "gaussian_nb",
            Estimator::ClassificationTree(_) => "classification_tree",
            Estimator::LogisticRegression(_) => "logistic_regression",
            Estimator::AdaBoost(_) => "ada_boost",
            Estimator::KNearestNeighbors(_) => "k_nearest_neighbors",
            Estimator::LogitBoost(_) => "logit_boost",
            Estimator::MultilayerPerceptron(_) => "multilayer_perceptron",
            Estimator::RandomForest(_) => "random_forest",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Estimator::GaussianNb(_) => "Gaussian Naive Bayes",
            Estimator::ClassificationTree(_) => "Classification Tree",
            Estimator::LogisticRegression(_) => "Logistic Regression",
            Estimator::AdaBoost(_) => "AdaBoost",
            Estimator::KNearestNeighbors(_) => "K-Nearest Neighbors",
            Estimator::LogitBoost(_) => "Logit Boost",
            Estimator::MultilayerPerceptron(_) => "Multilayer Perceptron",
            Estimator::RandomForest(_) => "Random Forest",
        }
    }

    /// `{algorithm}_{task}`.
    pub fn model_key(&self, task: TaskType) -> String {
        format!("{}_{task}", self.key())
    }

    /// Train a fresh model on already-scaled data.
    pub fn train(&self, data: &ScaledDataset) -> Result<TrainedModel, String> {
        if data.distinct_labels() < 2 {
            return Err("Training data needs at least two distinct labels".to_string());
        }
        let model = match self {
            Estimator::GaussianNb(opts) => TrainedModel::GaussianNb(train_gaussian_nb(data, opts)?),
            Estimator::ClassificationTree(opts) => {
                TrainedModel::ClassificationTree(train_tree(data, opts)?)
            }
            Estimator::LogisticRegression(opts) => {
                TrainedModel::LogisticRegression(train_logreg(data, opts)?)
            }
            Estimator::AdaBoost(opts) => TrainedModel::AdaBoost(train_ada_boost(data, opts)?),
            Estimator::KNearestNeighbors(opts) => TrainedModel::KNearestNeighbors(train_knn(data, opts)?),
            Estimator::LogitBoost(opts) => TrainedModel::LogitBoost(train_logit_boost(data, opts)?),
            Estimator::MultilayerPerceptron(opts) => {
                TrainedModel::MultilayerPerceptron(train_mlp(data, opts)?)
            }
            Estimator::RandomForest(opts) => TrainedModel::RandomForest(train_random_forest(data, opts)?),
        };
        Ok(model)
    }

    /// Fit a scaler on `data`, then train on the scaled rows.
    pub fn fit_scaled(&self, data: &LabeledDataset) -> Result<ScaledModel, String> {
        let scaler = StandardScaler::fit(data)?;
        self.fit_with_scaler(scaler, data)
    }

    /// Train on `data` scaled by an already-fitted `scaler`.
    pub fn fit_with_scaler(
        &self,
        scaler: StandardScaler,
        data: &LabeledDataset,
    ) -> Result<ScaledModel, String> {
        let scaled = scaler.transform(data)?;
        let model = self.train(&scaled)?;
        Ok(ScaledModel { model, scaler })
    }
}

impl Hyperparameters for Estimator {
    fn describe_hyperparameters(&self) -> BTreeMap<String, Value> {
        match self {
            Estimator::GaussianNb(opts) => opts.describe_hyperparameters(),
            Estimator::ClassificationTree(opts) => opts.describe_hyperparameters(),
            Estimator::LogisticRegression(opts) => opts.describe_hyperparameters(),
            Estimator::AdaBoost(opts) => opts.describe_hyperparameters(),
            Estimator::KNearestNeighbors(opts) => opts.describe_hyperparameters(),
            Estimator::LogitBoost(opts) => opts.describe_hyperparameters(),
            Estimator::MultilayerPerceptron(opts) => opts.describe_hyperparameters(),
            Estimator::RandomForest(opts) => opts.describe_hyperparameters(),
        }
    }
}

/// Anything that labels scaled rows.
pub trait Classifier {
    fn classes(&self) -> &[String];

    /// Predicted class index per row.
    fn predict(&self, data: &ScaledDataset) -> Vec<usize>;
}

/// A trained estimator, serialised as the `.model` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum TrainedModel {
    GaussianNb(GaussianNbModel),
    ClassificationTree(DecisionTree),
    LogisticRegression(LogRegModel),
    AdaBoost(AdaBoostModel),
    KNearestNeighbors(KnnModel),
    LogitBoost(LogitBoostModel),
    MultilayerPerceptron(MlpModel),
    RandomForest(RandomForestModel),
}

impl TrainedModel {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TrainedModel::GaussianNb(m) => m.validate(),
            TrainedModel::ClassificationTree(m) => m.validate(),
            TrainedModel::LogisticRegression(m) => m.validate(),
            TrainedModel::AdaBoost(m) => m.validate(),
            TrainedModel::KNearestNeighbors(m) => m.validate(),
            TrainedModel::LogitBoost(m) => m.validate(),
            TrainedModel::MultilayerPerceptron(m) => m.validate(),
            TrainedModel::RandomForest(m) => m.validate(),
        }
    }

    fn predict_row(&self, row: &[f32]) -> usize {
        match self {
            TrainedModel::GaussianNb(m) => m.predict_class_index(row),
            TrainedModel::ClassificationTree(m) => m.predict_class_index(row),
            TrainedModel::LogisticRegression(m) => m.predict_class_index(row),
            TrainedModel::AdaBoost(m) => m.predict_class_index(row),
            TrainedModel::KNearestNeighbors(m) => m.predict_class_index(row),
            TrainedModel::LogitBoost(m) => m.predict_class_index(row),
            TrainedModel::MultilayerPerceptron(m) => m.predict_class_index(row),
            TrainedModel::RandomForest(m) => m.predict_class_index(row),
        }
    }
}

impl Classifier for TrainedModel {
    fn classes(&self) -> &[String] {
        match self {
            TrainedModel::GaussianNb(m) => &m.classes,
            TrainedModel::ClassificationTree(m) => &m.classes,
            TrainedModel::LogisticRegression(m) => &m.classes,
            TrainedModel::AdaBoost(m) => &m.classes,
            TrainedModel::KNearestNeighbors(m) => &m.classes,
            TrainedModel::LogitBoost(m) => &m.classes,
            TrainedModel::MultilayerPerceptron(m) => &m.classes,
            TrainedModel::RandomForest(m) => &m.classes,
        }
    }

    fn predict(&self, data: &ScaledDataset) -> Vec<usize> {
        data.x.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// A trained model bound to the scaler it was trained behind.
///
/// Takes raw (unscaled) rows; the paired scaler is always applied first.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledModel {
    model: TrainedModel,
    scaler: StandardScaler,
}

impl ScaledModel {
    /// Pair a model with a scaler, e.g. after loading both from storage.
    pub fn new(model: TrainedModel, scaler: StandardScaler) -> Result<Self, String> {
        model.validate()?;
        scaler.validate()?;
        Ok(Self { model, scaler })
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn into_parts(self) -> (TrainedModel, StandardScaler) {
        (self.model, self.scaler)
    }

    pub fn predict(&self, data: &LabeledDataset) -> Result<Vec<usize>, String> {
        let scaled = self.scaler.transform(data)?;
        Ok(self.model.predict(&scaled))
    }

    pub fn accuracy(&self, data: &LabeledDataset) -> Result<f64, String> {
        Ok(accuracy_score(&data.y, &self.predict(data)?))
    }

    pub fn evaluate(&self, data: &LabeledDataset) -> Result<EvaluationReport, String> {
        let predicted = self.predict(data)?;
        Ok(EvaluationReport::from_predictions(&data.classes, &data.y, &predicted))
    }
}
