//! Record store trait and namespaces.
//!
//! This module defines the storage seam used by the indexer:
//! - `RecordStore` - Key-value persistence for signed records and the snapshot
//! - `Namespace` - One namespace per record kind plus the cache namespace
//!
//! Implementations live in the parent module (`FsRecordStore`) and in
//! `memory` (`MemoryRecordStore`).

use crate::Result;
use crate::models::RecordKind;
use std::fmt;

/// A storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Signed records of one kind
    Records(RecordKind),
    /// Cached index snapshots
    Cache,
}

impl Namespace {
    /// Directory (or prefix) name for this namespace.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Records(kind) => kind.dir_name(),
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Trait for stores that persist ledger records and the index snapshot.
///
/// Values are JSON documents. Implementations must make `put` atomic: a
/// reader sees either the previous value or the new one, never a partial
/// write. Methods take `&self` so independent reads can run concurrently.
pub trait RecordStore: Send + Sync {
    /// List all keys in a namespace.
    fn list(&self, ns: Namespace) -> Result<Vec<String>>;

    /// Read one value. Returns `Ok(None)` when the key is absent.
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write one value, replacing any existing value atomically.
    fn put(&self, ns: Namespace, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Delete one value. Returns whether anything was removed.
    fn delete(&self, ns: Namespace, key: &str) -> Result<bool>;

    /// Check whether a key exists.
    fn exists(&self, ns: Namespace, key: &str) -> Result<bool>;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the backend type name.
    fn backend_type(&self) -> &'static str;
}
