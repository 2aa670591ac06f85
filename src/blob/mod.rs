//! Durable key-value blob storage used for every pipeline artifact.
//!
//! Keys are `/`-separated relative paths such as `models/gaussian_nb_detector.model`.
//! Nothing outside this module touches the filesystem except ephemeral
//! scratch files (see [`scratch`]).

mod fs;
mod memory;
pub mod scratch;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Access level attached to a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Errors raised by blob store backends.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The key is empty, absolute, or escapes the store root.
    #[error("Invalid blob key {0:?}")]
    InvalidKey(String),
    #[error("Failed to read blob {key} at {path}: {source}")]
    Read {
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write blob {key} at {path}: {source}")]
    Write {
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
    /// A scratch copy could not be created or read back.
    #[error("Scratch file error: {0}")]
    Scratch(std::io::Error),
    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("Blob store lock poisoned")]
    Poisoned,
}

/// Abstract durable store. Implementations must be safe to share behind `&`.
pub trait BlobStore {
    fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// Return the stored bytes, or `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8], visibility: Visibility) -> Result<(), BlobError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        (**self).exists(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: &[u8], visibility: Visibility) -> Result<(), BlobError> {
        (**self).put(key, bytes, visibility)
    }
}

/// Join key segments with `/`, collapsing duplicate separators.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..");
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_key_handles_separators() {
        assert_eq!(join_key("models/", "/a.json"), "models/a.json");
        assert_eq!(join_key("", "a.json"), "a.json");
    }

    #[test]
    fn rejects_escaping_keys() {
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("models/a.json").is_ok());
    }
}
