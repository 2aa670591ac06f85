//! Annotation input, feature files and the in-memory datasets built from them.

pub mod annotations;
pub mod builder;
pub mod extractor;
pub mod features;
pub mod labeled;

pub use labeled::{DatasetSplit, LabeledDataset, TaskType};
