//! Explicitly invalidated cache for derived metric documents.
//!
//! The store reads aggregate metrics through a [`MetricsCache`] handed to it by
//! the caller; writers call [`MetricsCache::forget`] for every key they touch.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

/// Cache abstraction injected into the training store.
pub trait MetricsCache {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value);
    fn forget(&self, key: &str);
}

/// Process-local cache backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    fn forget(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(key).is_some() {
                debug!(key, "Invalidated cached metrics");
            }
        }
    }
}

/// Cache that never retains anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl MetricsCache for NoCache {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn put(&self, _key: &str, _value: Value) {}

    fn forget(&self, _key: &str) {}
}
