use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{ConfigError, PipelineConfig};
use crate::app_dirs;

/// File name of the pipeline config inside the application directory.
pub const CONFIG_FILE_NAME: &str = "melonml.toml";

/// Resolve the default configuration file path.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the config from `path`, or from the application directory when `None`.
///
/// A missing file yields defaults; a malformed file is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };
    load_from(&path)
}

/// Load and normalize configuration from a specific TOML file.
pub fn load_from(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        info!("No config at {}; using defaults", path.display());
        return Ok(PipelineConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PipelineConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config.normalized())
}

/// Write the config as TOML through a temp file so a crash never leaves half a file.
pub fn save_to_path(config: &PipelineConfig, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
        path: parent.to_path_buf(),
        source,
    })?;
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(data.as_bytes()).map_err(write_err)?;
    tmp.persist(path)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[training]\nk_folds = 3\nmax_imbalance_ratio = 1.5\n\n[storage]\nroot = \"/data/blobs\"\n",
        )
        .unwrap();
        let config = load_from(&path).unwrap();
        assert_eq!(config.training.k_folds, 3);
        assert_eq!(config.training.max_imbalance_ratio, 1.5);
        assert_eq!(config.training.seed, Some(12_345));
        assert_eq!(config.storage.root, PathBuf::from("/data/blobs"));
        assert_eq!(config.layout.models_dir, "models");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[training\nk_folds = ").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::ParseToml { .. })));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = PipelineConfig::default();
        config.training.seed = None;
        config.training.k_folds = 4;
        save_to_path(&config, &path).unwrap();
        assert_eq!(load_from(&path).unwrap(), config);
    }
}
