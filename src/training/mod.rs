//! Model training, evaluation and artifact versioning.

pub mod orchestrator;
pub mod store;

pub use orchestrator::{ModelOutcome, RunOptions, TaskOutcome, TaskReport, Trainer, TrainingError, TrainingReport};
pub use store::{ModelMetadata, ModelStore, StoreError, ValidationBundle};
