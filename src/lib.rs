//! Feature extraction, class balancing, training and evaluation pipeline for
//! melon detectors and ripeness classifiers.

/// Application directory resolution.
pub mod app_dirs;
/// Durable artifact storage.
pub mod blob;
/// Explicitly invalidated metrics cache.
pub mod cache;
/// Command-line arguments shared by the binaries.
pub mod cli;
/// TOML pipeline configuration.
pub mod config;
/// Annotations, feature files and the corpus builder.
pub mod dataset;
/// Progress/status events for streaming consumers.
pub mod events;
/// Tracing subscriber setup.
pub mod logging;
/// Estimators, scaling, metrics, cross-validation and learning curves.
pub mod ml;
/// Training orchestration and model versioning.
pub mod training;
