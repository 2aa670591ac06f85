use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{BlobError, BlobStore, Visibility, validate_key};

/// In-process blob store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, Visibility)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn visibility(&self, key: &str) -> Option<Visibility> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|(_, visibility)| *visibility))
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        validate_key(key)?;
        let objects = self.objects.lock().map_err(|_| BlobError::Poisoned)?;
        Ok(objects.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        validate_key(key)?;
        let objects = self.objects.lock().map_err(|_| BlobError::Poisoned)?;
        Ok(objects.get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn put(&self, key: &str, bytes: &[u8], visibility: Visibility) -> Result<(), BlobError> {
        validate_key(key)?;
        let mut objects = self.objects.lock().map_err(|_| BlobError::Poisoned)?;
        objects.insert(key.to_string(), (bytes.to_vec(), visibility));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_visibility_and_keys() {
        let store = MemoryBlobStore::new();
        store.put("b", b"2", Visibility::Public).unwrap();
        store.put("a", b"1", Visibility::Private).unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.visibility("b"), Some(Visibility::Public));
        assert_eq!(store.get("missing").unwrap(), None);
    }
}
