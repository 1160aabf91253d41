//! Command implementations for the Keelson CLI.
//!
//! Each command returns a result type implementing [`Output`], which the
//! binary prints as JSON (default) or human-readable text.
//! - `init` - Create the ledger layout
//! - `index_*` - Generate, inspect, invalidate and validate the snapshot
//! - `activity` - Live activity stream
//! - `task_show` - One enriched task

use crate::config::{ConfigOverrides, ResolvedConfig, resolve_config};
use crate::indexer::{GenerationReport, Indexer, IndexerOptions};
use crate::models::index::{
    ActivityEvent, EnrichedTask, IndexMetadata, IndexSnapshot, IntegrityReport, IntegrityStatus,
};
use crate::storage::{FsRecordStore, Namespace, ledger_dir, resolve_commit};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Paths and settings shared by every command.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub repo_path: PathBuf,
    pub ledger_root: PathBuf,
    pub config: ResolvedConfig,
}

impl Workspace {
    /// Resolve the ledger location and its settings.
    pub fn resolve(repo_path: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let ledger_root = ledger_dir(repo_path);
        let config = resolve_config(&ledger_root, overrides)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
            ledger_root,
            config,
        })
    }

    /// Indexer over the on-disk ledger. Fails if the ledger is not initialized.
    pub fn indexer(&self) -> Result<Indexer> {
        let store = FsRecordStore::open(&self.ledger_root)?;
        let options = IndexerOptions {
            cache_key: self.config.cache_key().to_string(),
            source_commit: resolve_commit(&self.repo_path),
            parallel_enrichment: self.config.parallel_enrichment(),
        };
        Ok(Indexer::with_defaults(Arc::new(store), options))
    }
}

// === init ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    pub initialized: bool,
    pub ledger_dir: String,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!("Initialized ledger at {}", self.ledger_dir)
        } else {
            format!("Ledger already initialized at {}", self.ledger_dir)
        }
    }
}

/// Create the ledger layout. Existing records are left untouched.
pub fn init(ws: &Workspace) -> Result<InitResult> {
    let existed = FsRecordStore::exists(&ws.ledger_root);
    FsRecordStore::init(&ws.ledger_root)?;
    Ok(InitResult {
        initialized: !existed,
        ledger_dir: ws.ledger_root.display().to_string(),
    })
}

// === index generate ===

impl Output for GenerationReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if !self.success {
            let mut lines = vec!["Index generation failed:".to_string()];
            lines.extend(self.errors.iter().map(|e| format!("  {}", e)));
            return lines.join("\n");
        }
        let t = &self.generation_time;
        format!(
            "Indexed {} records in {} ms (read {} ms, compute {} ms, write {} ms)\n\
             Derived states: {}\n\
             Snapshot: {} bytes ({})",
            self.records_processed,
            t.total_ms,
            t.read_ms,
            t.compute_ms,
            t.write_ms,
            self.derived_states_applied,
            self.cache_size_bytes,
            self.cache_strategy
        )
    }
}

/// Rebuild the snapshot. Failures are carried in the report.
pub fn index_generate(ws: &Workspace) -> Result<GenerationReport> {
    Ok(ws.indexer()?.generate_index())
}

// === index status ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub cache_key: String,
    pub exists: bool,
    pub up_to_date: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMetadata>,
}

impl Output for IndexStatus {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let Some(meta) = &self.metadata else {
            return format!(
                "No index snapshot ({}). Run `kn index generate`.",
                self.cache_key
            );
        };
        let freshness = if self.up_to_date { "up to date" } else { "stale" };
        let counts: Vec<String> = meta
            .record_counts
            .iter()
            .map(|(kind, n)| format!("{} {}", n, kind))
            .collect();
        format!(
            "Index {} ({})\n  Generated: {}\n  Commit: {}\n  Integrity: {}\n  Records: {}",
            freshness,
            self.cache_key,
            meta.generated_at.to_rfc3339(),
            meta.last_commit_hash,
            meta.integrity_status.as_str(),
            counts.join(", ")
        )
    }
}

pub fn index_status(ws: &Workspace) -> Result<IndexStatus> {
    let indexer = ws.indexer()?;
    let snapshot = match indexer.cached_snapshot() {
        Ok(snapshot) => snapshot,
        Err(Error::InvalidInput(_) | Error::Json(_)) => None,
        Err(e) => return Err(e),
    };
    let up_to_date = snapshot.is_some() && indexer.is_index_up_to_date()?;
    Ok(IndexStatus {
        cache_key: indexer.options().cache_key.clone(),
        exists: snapshot.is_some(),
        up_to_date,
        metadata: snapshot.map(|s| s.metadata),
    })
}

// === index show ===

pub struct IndexShow {
    pub snapshot: Option<IndexSnapshot>,
}

impl Output for IndexShow {
    fn to_json(&self) -> String {
        match &self.snapshot {
            Some(snapshot) => json(snapshot),
            None => json(&serde_json::json!({
                "fresh": false,
                "hint": "Run `kn index generate` to build the index",
            })),
        }
    }

    fn to_human(&self) -> String {
        let Some(snapshot) = &self.snapshot else {
            return "No fresh index. Run `kn index generate`.".to_string();
        };
        let sets = &snapshot.derived_states;
        let mut lines = vec![
            format!(
                "Index generated {} ({} tasks, integrity {})",
                snapshot.metadata.generated_at.to_rfc3339(),
                snapshot.enriched_tasks.len(),
                snapshot.metadata.integrity_status.as_str()
            ),
            format!(
                "  Stalled: {}  At risk: {}  Needs clarification: {}  Blocked: {}",
                sets.stalled_tasks.len(),
                sets.at_risk_tasks.len(),
                sets.needs_clarification_tasks.len(),
                sets.blocked_by_dependency_tasks.len()
            ),
        ];
        for task in &snapshot.enriched_tasks {
            lines.push(format!(
                "  [{:>3}] {} {} ({})",
                task.derived_state.health_score, task.task.id, task.task.title, task.task.status
            ));
        }
        lines.join("\n")
    }
}

pub fn index_show(ws: &Workspace) -> Result<IndexShow> {
    Ok(IndexShow {
        snapshot: ws.indexer()?.get_index_data(),
    })
}

// === index invalidate ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResult {
    pub cache_key: String,
    pub removed: bool,
}

impl Output for InvalidateResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.removed {
            format!("Removed index snapshot ({})", self.cache_key)
        } else {
            format!("No index snapshot to remove ({})", self.cache_key)
        }
    }
}

pub fn index_invalidate(ws: &Workspace) -> Result<InvalidateResult> {
    let indexer = ws.indexer()?;
    let cache_key = indexer.options().cache_key.clone();
    let existed = indexer.store().exists(Namespace::Cache, &cache_key)?;
    indexer.invalidate_cache()?;
    Ok(InvalidateResult {
        cache_key,
        removed: existed,
    })
}

// === index validate ===

impl Output for IntegrityReport {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Integrity: {} ({} records, {} checksum failures, {} signature failures)",
            self.status.as_str(),
            self.records_scanned,
            self.checksum_failures,
            self.signature_failures
        )];
        if self.status != IntegrityStatus::Valid {
            for finding in self.errors.iter().chain(&self.warnings) {
                lines.push(format!("  {:?}: {}", finding.kind, finding.message));
            }
        }
        lines.join("\n")
    }
}

pub fn index_validate(ws: &Workspace) -> Result<IntegrityReport> {
    ws.indexer()?.validate_integrity()
}

// === activity ===

#[derive(Serialize)]
pub struct ActivityList {
    pub count: usize,
    pub events: Vec<ActivityEvent>,
}

impl Output for ActivityList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return "No activity.".to_string();
        }
        self.events
            .iter()
            .map(|e| {
                let when = chrono::DateTime::from_timestamp(e.timestamp, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| e.timestamp.to_string());
                let actor = e.actor_id.as_deref().unwrap_or("-");
                format!(
                    "{}  {:<17} {} {} [{}]",
                    when,
                    e.event_type.as_str(),
                    e.entity_id,
                    e.entity_title,
                    actor
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn activity(ws: &Workspace, limit: usize) -> Result<ActivityList> {
    let events = ws.indexer()?.activity(limit)?;
    Ok(ActivityList {
        count: events.len(),
        events,
    })
}

// === task ===

impl Output for EnrichedTask {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let state = &self.derived_state;
        let mut flags = Vec::new();
        if state.is_stalled {
            flags.push("stalled");
        }
        if state.is_at_risk {
            flags.push("at risk");
        }
        if state.needs_clarification {
            flags.push("needs clarification");
        }
        if state.is_blocked_by_dependency {
            flags.push("blocked");
        }
        let mut lines = vec![
            format!("{}: {}", self.task.id, self.task.title),
            format!(
                "  Status: {}  Priority: {}  Health: {}",
                self.task.status,
                self.task.priority.as_str(),
                state.health_score
            ),
            format!("  Last activity: {}", self.recent_activity),
        ];
        if !flags.is_empty() {
            lines.push(format!("  Flags: {}", flags.join(", ")));
        }
        if !self.relationships.depends_on.is_empty() {
            lines.push(format!(
                "  Depends on: {}",
                self.relationships.depends_on.join(", ")
            ));
        }
        if !self.relationships.blocked_by.is_empty() {
            lines.push(format!(
                "  Blocked by: {}",
                self.relationships.blocked_by.join(", ")
            ));
        }
        if let Some(version) = &self.release.last_release_version {
            lines.push(format!("  Released in: {}", version));
        }
        lines.join("\n")
    }
}

pub fn task_show(ws: &Workspace, id: &str) -> Result<EnrichedTask> {
    ws.indexer()?.enriched_task(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(repo: &Path) -> Workspace {
        Workspace {
            repo_path: repo.to_path_buf(),
            ledger_root: repo.join(crate::storage::LEDGER_DIR_NAME),
            config: ResolvedConfig::default(),
        }
    }

    #[test]
    fn test_commands_require_init() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(dir.path());
        assert!(matches!(index_generate(&ws), Err(Error::NotInitialized)));
        assert!(matches!(activity(&ws, 5), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(dir.path());
        assert!(init(&ws).unwrap().initialized);
        assert!(!init(&ws).unwrap().initialized);
    }

    #[test]
    fn test_generate_status_invalidate_cycle() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(dir.path());
        init(&ws).unwrap();

        let status = index_status(&ws).unwrap();
        assert!(!status.exists);
        assert!(status.to_human().contains("kn index generate"));

        let report = index_generate(&ws).unwrap();
        assert!(report.success, "{:?}", report.errors);

        let status = index_status(&ws).unwrap();
        assert!(status.exists && status.up_to_date);
        assert!(index_show(&ws).unwrap().snapshot.is_some());

        assert!(index_invalidate(&ws).unwrap().removed);
        assert!(!index_invalidate(&ws).unwrap().removed);
        let shown = index_show(&ws).unwrap();
        assert!(shown.snapshot.is_none());
        assert!(shown.to_json().contains("\"fresh\":false"));
    }
}
