//! Local scratch copies of blobs.
//!
//! Each copy is a [`NamedTempFile`] and is removed when dropped, so every exit
//! path (success, `?`, panic unwinding) cleans up after itself.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::{BlobError, BlobStore, Visibility};

/// A scratch file mirroring one blob for the duration of a read or write.
#[derive(Debug)]
pub struct ScratchCopy {
    key: String,
    file: NamedTempFile,
}

impl ScratchCopy {
    /// Create an empty scratch file for `key` in the system temp directory.
    pub fn empty(key: &str) -> Result<Self, BlobError> {
        Self::empty_in(key, None)
    }

    /// Create an empty scratch file for `key`, inside `dir` when given.
    pub fn empty_in(key: &str, dir: Option<&Path>) -> Result<Self, BlobError> {
        let file = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(BlobError::Scratch)?;
        Ok(Self {
            key: key.to_string(),
            file,
        })
    }

    /// Create a scratch file for `key` pre-filled with `bytes`.
    pub fn with_contents(key: &str, bytes: &[u8], dir: Option<&Path>) -> Result<Self, BlobError> {
        let mut copy = Self::empty_in(key, dir)?;
        copy.file.write_all(bytes).map_err(BlobError::Scratch)?;
        copy.file.flush().map_err(BlobError::Scratch)?;
        Ok(copy)
    }

    /// Copy the current contents of `key` into a fresh scratch file.
    ///
    /// A missing blob yields an empty scratch file.
    pub fn download(store: &dyn BlobStore, key: &str) -> Result<Self, BlobError> {
        match store.get(key)? {
            Some(bytes) => Self::with_contents(key, &bytes, None),
            None => Self::empty(key),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>, BlobError> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(BlobError::Scratch)?;
        self.file
            .read_to_end(&mut bytes)
            .map_err(BlobError::Scratch)?;
        Ok(bytes)
    }

    /// Upload the scratch contents back to the store. The file is removed on drop.
    pub fn upload(mut self, store: &dyn BlobStore, visibility: Visibility) -> Result<(), BlobError> {
        self.file.flush().map_err(BlobError::Scratch)?;
        let bytes = self.read_all()?;
        store.put(&self.key, &bytes, visibility)
    }
}

impl Write for ScratchCopy {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
