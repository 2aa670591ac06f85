use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{BlobError, BlobStore, Visibility, validate_key};

/// Blob store rooted at a local directory.
///
/// Writes go through a temp file in the destination directory and are
/// renamed into place. Public objects get world-readable permissions on Unix.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobError::Read {
                key: key.to_string(),
                path,
                source,
            }),
        }
    }

    fn put(&self, key: &str, bytes: &[u8], visibility: Visibility) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        let write_err = |source| BlobError::Write {
            key: key.to_string(),
            path: path.clone(),
            source,
        };
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(write_err)?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        apply_visibility(tmp.path(), visibility).map_err(write_err)?;
        tmp.persist(&path).map_err(|err| write_err(err.error))?;
        debug!(key, bytes = bytes.len(), "Stored blob");
        Ok(())
    }
}

#[cfg(unix)]
fn apply_visibility(path: &Path, visibility: Visibility) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match visibility {
        Visibility::Private => 0o600,
        Visibility::Public => 0o644,
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_visibility(_path: &Path, _visibility: Visibility) -> std::io::Result<()> {
    Ok(())
}
