//! Snapshot persistence and freshness.
//!
//! The snapshot lives in the store's cache namespace under one key. It is
//! stale as soon as any task or cycle was created after it was generated.

use crate::models::index::IndexSnapshot;
use crate::models::{RecordKind, parse_id_timestamp};
use crate::storage::{Namespace, RecordStore};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cache key of the snapshot.
pub const DEFAULT_CACHE_KEY: &str = "index";

/// Reads, writes and ages the cached snapshot.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn RecordStore>,
    key: String,
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("location", &self.store.location())
            .field("key", &self.key)
            .finish()
    }
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn RecordStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the snapshot. `Ok(None)` when there is none.
    pub fn read(&self) -> Result<Option<IndexSnapshot>> {
        let Some(value) = self.store.get(Namespace::Cache, &self.key)? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("cached index is corrupt: {}", e)))?;
        Ok(Some(snapshot))
    }

    /// Persist the snapshot, returning its serialized size in bytes.
    pub fn write(&self, snapshot: &IndexSnapshot) -> Result<u64> {
        let value = serde_json::to_value(snapshot)?;
        let size = serde_json::to_vec_pretty(&value)?.len() as u64;
        self.store.put(Namespace::Cache, &self.key, &value)?;
        Ok(size)
    }

    /// Delete the snapshot. Returns whether one existed.
    pub fn invalidate(&self) -> Result<bool> {
        let removed = self.store.delete(Namespace::Cache, &self.key)?;
        if removed {
            debug!(key = %self.key, "Index cache invalidated");
        }
        Ok(removed)
    }

    /// Whether no task or cycle is newer than the snapshot.
    ///
    /// A task or cycle id without a timestamp is an error.
    pub fn is_fresh(&self, snapshot: &IndexSnapshot) -> Result<bool> {
        let generated_at = snapshot.metadata.generated_at.timestamp();
        for kind in [RecordKind::Task, RecordKind::Cycle] {
            for id in self.store.list(Namespace::Records(kind))? {
                if parse_id_timestamp(&id)? > generated_at {
                    debug!(%kind, %id, "Index is stale");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Whether a snapshot exists and is fresh.
    ///
    /// A corrupt snapshot counts as missing.
    pub fn is_up_to_date(&self) -> Result<bool> {
        let snapshot = match self.read() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(e @ (Error::InvalidInput(_) | Error::Json(_))) => {
                warn!(error = %e, "Ignoring unreadable index cache");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.is_fresh(&snapshot)
    }

    /// The snapshot if present and fresh.
    ///
    /// Never fails: any problem is logged and treated as a cache miss.
    pub fn get_fresh(&self) -> Option<IndexSnapshot> {
        let snapshot = match self.read() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read index cache; run `kn index generate` to rebuild it");
                return None;
            }
        };
        match self.is_fresh(&snapshot) {
            Ok(true) => Some(snapshot),
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, "Failed to check index freshness; run `kn index generate` to rebuild it");
                None
            }
        }
    }
}
