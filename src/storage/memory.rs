//! In-memory record store.
//!
//! Useful for embedding the indexer in processes that already hold the
//! ledger in memory, and for tests.

use super::backend::{Namespace, RecordStore};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Record store backed by a map guarded by a `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    entries: RwLock<BTreeMap<(Namespace, String), serde_json::Value>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Other("memory store lock poisoned".to_string())
}

impl RecordStore for MemoryRecordStore {
    fn list(&self, ns: Namespace) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .keys()
            .filter(|(key_ns, _)| *key_ns == ns)
            .map(|(_, key)| key.clone())
            .collect())
    }

    fn get(&self, ns: Namespace, key: &str) -> Result<Option<serde_json::Value>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(&(ns, key.to_string())).cloned())
    }

    fn put(&self, ns: Namespace, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert((ns, key.to_string()), value.clone());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(&(ns, key.to_string())).is_some())
    }

    fn exists(&self, ns: Namespace, key: &str) -> Result<bool> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(&(ns, key.to_string())))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
