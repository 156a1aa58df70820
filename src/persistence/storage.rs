//! Key-value storage backends for persisted state.

use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Durable string-keyed storage of JSON values.
///
/// Calls are synchronous. Failures are returned to the caller as-is;
/// retrying is the backend's business.
pub trait KeyValueStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: RwLock<HashMap<String, String>>,
    writes: AtomicU64,
}

/// In-process storage holding serialized JSON text.
///
/// Clones share the same contents, which makes it easy to reopen a store
/// against the "same disk" in tests.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized text stored under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.entries.read().get(key).cloned()
    }

    /// Store raw text under `key`, bypassing serialization.
    pub fn insert_raw(&self, key: &str, text: impl Into<String>) {
        self.inner.entries.write().insert(key.to_string(), text.into());
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self.inner.entries.read().get(key) {
            Some(text) => serde_json::from_str(text)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.inner.entries.write().insert(key.to_string(), text);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.entries.write().remove(key);
        Ok(())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.len())
            .field("writes", &self.write_count())
            .finish()
    }
}

/// A storage backend bound to one key.
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl Persistence {
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Result<Option<serde_json::Value>> {
        self.storage.get(&self.key)
    }

    pub fn put(&self, value: &serde_json::Value) -> Result<()> {
        self.storage.put(&self.key, value)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&self.key)
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").field("key", &self.key).finish()
    }
}
