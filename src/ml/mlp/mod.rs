//! Lightweight one-hidden-layer MLP classifier.

mod model;
mod train;

pub use model::MlpModel;
pub use train::{TrainOptions, train_mlp};
