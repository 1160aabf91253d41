//! Storage layer for Keelson data.
//!
//! This module handles persistence of signed records and the index snapshot.
//!
//! ## Storage Backends
//!
//! - **File backend** (default): one JSON document per record under the
//!   ledger directory (`<repo>/.keelson/` unless overridden)
//! - **Memory backend**: in-process map, see [`memory`]
//!
//! ## File Layout
//!
//! ```text
//! .keelson/
//!   tasks/<id>.json
//!   cycles/<id>.json
//!   actors/<id>.json
//!   feedback/<id>.json
//!   executions/<id>.json
//!   changelogs/<id>.json
//!   cache/index.json
//!   config.kdl
//! ```

pub mod backend;
pub mod memory;

pub use backend::{Namespace, RecordStore};
pub use memory::MemoryRecordStore;

use crate::models::RecordKind;
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default ledger directory name inside a repository.
pub const LEDGER_DIR_NAME: &str = ".keelson";

/// Environment variable overriding the ledger directory.
pub const LEDGER_DIR_ENV: &str = "KN_LEDGER_DIR";

const RECORD_EXTENSION: &str = "json";

/// File-backed record store: one JSON file per key.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    /// Root directory of the ledger
    pub root: PathBuf,
}

impl FsRecordStore {
    /// Open an existing ledger directory.
    pub fn open(root: &Path) -> Result<Self> {
        if !Self::exists(root) {
            return Err(Error::NotInitialized);
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Initialize the ledger layout, creating missing namespace directories.
    pub fn init(root: &Path) -> Result<Self> {
        for ns in all_namespaces() {
            fs::create_dir_all(root.join(ns.dir_name()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Check if a ledger exists at the given root.
    pub fn exists(root: &Path) -> bool {
        root.is_dir() && root.join(RecordKind::Task.dir_name()).is_dir()
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    fn path_for(&self, ns: Namespace, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self
            .namespace_dir(ns)
            .join(format!("{}.{}", key, RECORD_EXTENSION)))
    }
}

/// Every namespace, records first.
pub fn all_namespaces() -> impl Iterator<Item = Namespace> {
    RecordKind::ALL
        .into_iter()
        .map(Namespace::Records)
        .chain(std::iter::once(Namespace::Cache))
}

/// Keys become file names, so they must not escape their namespace directory.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(Error::InvalidId(format!("Invalid storage key: {:?}", key)));
    }
    Ok(())
}

impl RecordStore for FsRecordStore {
    fn list(&self, ns: Namespace) -> Result<Vec<String>> {
        let dir = self.namespace_dir(ns);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                // In-flight temp files are dot-prefixed
                if !stem.starts_with('.') {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn get(&self, ns: Namespace, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(ns, key)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn put(&self, ns: Namespace, key: &str, value: &serde_json::Value) -> Result<()> {
        let path = self.path_for(ns, key)?;
        let dir = self.namespace_dir(ns);
        fs::create_dir_all(&dir)?;

        // Write to a sibling temp file, then rename over the target.
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(".partial")
            .tempfile_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<bool> {
        let path = self.path_for(ns, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, ns: Namespace, key: &str) -> Result<bool> {
        Ok(self.path_for(ns, key)?.is_file())
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

/// Find the git repository root containing `start`, if any.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Resolve the ledger directory for a repository.
///
/// Priority: `KN_LEDGER_DIR` env var > `<repo>/.keelson`
pub fn ledger_dir(repo_path: &Path) -> PathBuf {
    match std::env::var_os(LEDGER_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => repo_path.join(LEDGER_DIR_NAME),
    }
}

/// Current commit of the repository holding the ledger, if it is a git checkout.
pub fn resolve_commit(repo_path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_path)
        .output()
        .ok()?;

    if output.status.success() {
        let hash = String::from_utf8(output.stdout).ok()?;
        Some(hash.trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FsRecordStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsRecordStore::init(&temp_dir.path().join(LEDGER_DIR_NAME)).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_init_creates_namespace_dirs() {
        let (_temp_dir, store) = create_test_store();
        for ns in all_namespaces() {
            assert!(store.root.join(ns.dir_name()).is_dir());
        }
        assert!(FsRecordStore::exists(&store.root));
    }

    #[test]
    fn test_open_uninitialized_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = FsRecordStore::open(&temp_dir.path().join("missing"));
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[test]
    fn test_put_get_roundtrip_and_list() {
        let (_temp_dir, store) = create_test_store();
        let ns = Namespace::Records(RecordKind::Task);

        store.put(ns, "1700000000-task-b", &json!({"id": "b"})).unwrap();
        store.put(ns, "1700000000-task-a", &json!({"id": "a"})).unwrap();

        assert_eq!(
            store.list(ns).unwrap(),
            vec!["1700000000-task-a", "1700000000-task-b"]
        );
        assert_eq!(
            store.get(ns, "1700000000-task-a").unwrap(),
            Some(json!({"id": "a"}))
        );
        assert_eq!(store.get(ns, "missing").unwrap(), None);
    }

    #[test]
    fn test_put_replaces_without_leaving_temp_files() {
        let (_temp_dir, store) = create_test_store();
        store.put(Namespace::Cache, "index", &json!({"v": 1})).unwrap();
        store.put(Namespace::Cache, "index", &json!({"v": 2})).unwrap();

        assert_eq!(store.get(Namespace::Cache, "index").unwrap(), Some(json!({"v": 2})));
        let files: Vec<_> = fs::read_dir(store.root.join("cache")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_temp_dir, store) = create_test_store();
        store.put(Namespace::Cache, "index", &json!({})).unwrap();
        assert!(store.delete(Namespace::Cache, "index").unwrap());
        assert!(!store.delete(Namespace::Cache, "index").unwrap());
        assert!(!store.exists(Namespace::Cache, "index").unwrap());
    }

    #[test]
    fn test_get_corrupt_file_is_error() {
        let (_temp_dir, store) = create_test_store();
        fs::write(store.root.join("cache").join("index.json"), "{not json").unwrap();
        assert!(matches!(
            store.get(Namespace::Cache, "index"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_rejects_path_escaping_keys() {
        let (_temp_dir, store) = create_test_store();
        assert!(store.put(Namespace::Cache, "../escape", &json!({})).is_err());
        assert!(store.get(Namespace::Cache, ".hidden").is_err());
        assert!(store.get(Namespace::Cache, "").is_err());
    }

    #[test]
    fn test_find_git_root() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_git_root(&nested), Some(temp_dir.path().to_path_buf()));
    }
}
