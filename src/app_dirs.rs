//! Resolution of the `.melonml` application directory.
//!
//! The directory sits under the OS config root unless `MELONML_CONFIG_HOME`
//! names another base. It holds `melonml.toml` and the `logs/` folder.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;

pub const APP_DIR_NAME: &str = ".melonml";

/// Replaces the OS config root when set to a non-empty value.
pub const CONFIG_HOME_ENV: &str = "MELONML_CONFIG_HOME";

const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No config directory could be resolved; set {CONFIG_HOME_ENV}")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Application directory layout rooted at `<base>/.melonml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    /// Resolve from the environment override, then the OS config root.
    pub fn resolve() -> Result<Self, AppDirError> {
        let override_base = std::env::var_os(CONFIG_HOME_ENV).map(PathBuf::from);
        let base = choose_base(override_base, || {
            BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
        })
        .ok_or(AppDirError::NoBaseDir)?;
        Ok(Self::under(&base))
    }

    pub fn under(base: &Path) -> Self {
        Self {
            root: base.join(APP_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join(LOGS_DIR_NAME)
    }

    /// Create `path` and its parents, returning it.
    pub fn ensure(path: PathBuf) -> Result<PathBuf, AppDirError> {
        match std::fs::create_dir_all(&path) {
            Ok(()) => Ok(path),
            Err(source) => Err(AppDirError::CreateDir { path, source }),
        }
    }
}

fn choose_base(
    override_base: Option<PathBuf>,
    platform: impl FnOnce() -> Option<PathBuf>,
) -> Option<PathBuf> {
    match override_base {
        Some(base) if !base.as_os_str().is_empty() => Some(base),
        _ => platform(),
    }
}

/// The `.melonml` root, created on demand.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    AppDirs::ensure(AppDirs::resolve()?.root().to_path_buf())
}

/// `<root>/logs`, created on demand.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    AppDirs::ensure(AppDirs::resolve()?.logs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_hangs_off_the_base() {
        let base = tempdir().unwrap();
        let dirs = AppDirs::under(base.path());
        assert_eq!(dirs.root(), base.path().join(APP_DIR_NAME));
        let logs = AppDirs::ensure(dirs.logs()).unwrap();
        assert_eq!(logs, base.path().join(".melonml").join("logs"));
        assert!(logs.is_dir());
    }

    #[test]
    fn empty_override_falls_back_to_platform() {
        let platform = || Some(PathBuf::from("/platform"));
        assert_eq!(
            choose_base(Some(PathBuf::from("/custom")), platform),
            Some(PathBuf::from("/custom"))
        );
        assert_eq!(
            choose_base(Some(PathBuf::new()), platform),
            Some(PathBuf::from("/platform"))
        );
        assert_eq!(choose_base(None, || None), None);
    }
}
