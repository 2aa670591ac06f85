//! Arguments shared by the pipeline binaries.

use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};

use crate::blob::FsBlobStore;
use crate::config::{self, ConfigError, PipelineConfig};
use crate::dataset::{DatasetSplit, TaskType};

/// `--type` selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSelection {
    Detector,
    Classifier,
    All,
}

impl TaskSelection {
    pub fn tasks(self) -> Vec<TaskType> {
        match self {
            TaskSelection::Detector => vec![TaskType::Detector],
            TaskSelection::Classifier => vec![TaskType::Classifier],
            TaskSelection::All => TaskType::ALL.to_vec(),
        }
    }
}

/// `--set` selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSelection {
    Train,
    Valid,
    Test,
    All,
}

impl SplitSelection {
    pub fn splits(self) -> Vec<DatasetSplit> {
        match self {
            SplitSelection::Train => vec![DatasetSplit::Train],
            SplitSelection::Valid => vec![DatasetSplit::Valid],
            SplitSelection::Test => vec![DatasetSplit::Test],
            SplitSelection::All => DatasetSplit::ALL.to_vec(),
        }
    }
}

/// Where configuration and artifacts come from.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Config file; defaults to `melonml.toml` in the application directory.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Blob store root, overriding `storage.root` from the config.
    #[arg(long)]
    pub storage: Option<PathBuf>,
}

impl StorageArgs {
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = config::load_or_default(self.config.as_deref())?;
        if let Some(root) = &self.storage {
            config.storage.root = root.clone();
        }
        Ok(config)
    }
}

pub fn open_store(config: &PipelineConfig) -> FsBlobStore {
    FsBlobStore::new(Path::new(&config.storage.root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_expands_to_every_member() {
        assert_eq!(TaskSelection::All.tasks(), TaskType::ALL.to_vec());
        assert_eq!(SplitSelection::All.splits().len(), 3);
        assert_eq!(SplitSelection::Valid.splits(), vec![DatasetSplit::Valid]);
    }

    #[test]
    fn storage_flag_overrides_config_root() {
        let dir = tempfile::tempdir().unwrap();
        let args = StorageArgs {
            config: Some(dir.path().join("missing.toml")),
            storage: Some(dir.path().join("blobs")),
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.storage.root, dir.path().join("blobs"));
        assert_eq!(config.training, crate::config::TrainingSettings::default());
    }
}
