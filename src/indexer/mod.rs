//! Index generation and the cached read model.
//!
//! [`Indexer`] ties the pieces together:
//! - reads the whole ledger from a [`RecordStore`]
//! - computes metrics, derived states, activity and per-task enrichment
//! - validates integrity
//! - persists one [`IndexSnapshot`] and serves it while it is fresh
//!
//! The pure helpers in the submodules can be used on their own.

pub mod activity;
pub mod cache;
pub mod derived;
pub mod enrich;
pub mod integrity;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use activity::{MAX_ACTIVITY_EVENTS, calculate_activity_history};
pub use cache::{DEFAULT_CACHE_KEY, SnapshotCache};
pub use derived::calculate_derived_states;
pub use enrich::{
    Authorship, EnrichmentContext, LastUpdated, calculate_health_score, calculate_last_updated,
    enrich_task_record,
};
pub use integrity::IntegrityValidator;

use crate::crypto::{Ed25519Primitives, IntegrityPrimitives};
use crate::ledger::Ledger;
use crate::metrics::{LedgerMetrics, MetricsProvider};
use crate::models::index::{
    ActivityEvent, EnrichedTask, INDEX_FORMAT_VERSION, IndexMetadata, IndexSnapshot,
    IntegrityReport,
};
use crate::storage::RecordStore;
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Snapshot serialization used by every store.
pub const CACHE_STRATEGY: &str = "json";

/// Tunables for an [`Indexer`].
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Key of the snapshot in the cache namespace
    pub cache_key: String,

    /// Commit the ledger was read at, recorded in the snapshot metadata
    pub source_commit: Option<String>,

    /// Enrich tasks on all available cores
    pub parallel_enrichment: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            source_commit: None,
            parallel_enrichment: true,
        }
    }
}

/// Wall-clock time spent in each generation phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimings {
    pub total_ms: u64,
    pub read_ms: u64,
    pub compute_ms: u64,
    pub write_ms: u64,
}

/// Outcome of one generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub success: bool,
    pub records_processed: usize,
    pub metrics_calculated: usize,
    pub derived_states_applied: usize,
    pub generation_time: PhaseTimings,
    pub cache_size_bytes: u64,
    pub cache_strategy: String,
    pub errors: Vec<String>,
}

impl GenerationReport {
    fn failed(error: &Error, total_ms: u64) -> Self {
        Self {
            success: false,
            generation_time: PhaseTimings {
                total_ms,
                ..PhaseTimings::default()
            },
            cache_strategy: CACHE_STRATEGY.to_string(),
            errors: vec![error.to_string()],
            ..Self::default()
        }
    }
}

/// Flatten metric groups into one object.
///
/// Object groups contribute their keys; any other value is stored under the
/// group name. A key already taken by an earlier group is kept and the later
/// value is dropped with a warning.
fn merge_metric_groups(
    groups: impl IntoIterator<Item = (&'static str, serde_json::Value)>,
) -> serde_json::Value {
    let mut merged = serde_json::Map::new();
    for (group, value) in groups {
        let fields = match value {
            serde_json::Value::Object(fields) => fields,
            other => std::iter::once((group.to_string(), other)).collect(),
        };
        for (key, value) in fields {
            match merged.entry(key) {
                serde_json::map::Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                serde_json::map::Entry::Occupied(slot) => {
                    warn!(group, key = %slot.key(), "Metric key already set by an earlier group, ignoring");
                }
            }
        }
    }
    serde_json::Value::Object(merged)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Builds, caches and serves the ledger index.
pub struct Indexer {
    store: Arc<dyn RecordStore>,
    metrics: Arc<dyn MetricsProvider>,
    validator: IntegrityValidator,
    cache: SnapshotCache,
    options: IndexerOptions,
    /// Held for the whole of a generation pass
    generation_lock: Mutex<()>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("store", &self.store.location())
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        metrics: Arc<dyn MetricsProvider>,
        primitives: Arc<dyn IntegrityPrimitives>,
        options: IndexerOptions,
    ) -> Self {
        let cache = SnapshotCache::new(Arc::clone(&store), options.cache_key.clone());
        Self {
            store,
            metrics,
            validator: IntegrityValidator::new(primitives),
            cache,
            options,
            generation_lock: Mutex::new(()),
        }
    }

    /// Indexer with the built-in metrics and Ed25519 primitives.
    pub fn with_defaults(store: Arc<dyn RecordStore>, options: IndexerOptions) -> Self {
        Self::new(
            store,
            Arc::new(LedgerMetrics::new()),
            Arc::new(Ed25519Primitives),
            options,
        )
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Read the whole ledger.
    pub fn load_ledger(&self) -> Result<Ledger> {
        Ledger::load(self.store.as_ref())
    }

    /// Rebuild and persist the snapshot.
    ///
    /// Failures are reported in the returned report, never as `Err`. A
    /// failed pass writes nothing. Concurrent calls run one at a time.
    pub fn generate_index(&self) -> GenerationReport {
        // The lock guards no data, so a poisoned lock is still usable.
        let _guard = self
            .generation_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let started = Instant::now();
        match self.run_generation(started) {
            Ok(report) => {
                info!(
                    records = report.records_processed,
                    derived = report.derived_states_applied,
                    bytes = report.cache_size_bytes,
                    total_ms = report.generation_time.total_ms,
                    "Index generated"
                );
                report
            }
            Err(e) => {
                warn!(error = %e, "Index generation failed");
                GenerationReport::failed(&e, elapsed_ms(started))
            }
        }
    }

    fn run_generation(&self, started: Instant) -> Result<GenerationReport> {
        let generated_at = Utc::now();
        let now = generated_at.timestamp();

        let read_start = Instant::now();
        let ledger = self.load_ledger()?;
        let read_ms = elapsed_ms(read_start);
        debug!(records = ledger.total(), read_ms, "Ledger loaded");

        let compute_start = Instant::now();
        let metrics = self.compute_metrics(&ledger)?;
        let lookup = ledger.lookup();
        let derived_states = calculate_derived_states(&lookup, now);
        let activity_history = calculate_activity_history(&ledger);
        let enriched_tasks = {
            let derived = derived_states.lookup();
            let ctx = EnrichmentContext {
                lookup: &lookup,
                derived: &derived,
                now,
            };
            enrich::enrich_all(&ctx, self.options.parallel_enrichment)?
        };
        let integrity = self.validator.validate(&ledger)?;
        let compute_ms = elapsed_ms(compute_start);
        debug!(compute_ms, "Index computed");

        let records_processed = ledger.total();
        let derived_states_applied = derived_states.total();
        let record_counts = ledger.record_counts();
        let Ledger {
            tasks,
            cycles,
            actors,
            feedback,
            ..
        } = ledger;

        let snapshot = IndexSnapshot {
            metadata: IndexMetadata {
                version: INDEX_FORMAT_VERSION.to_string(),
                generated_at,
                last_commit_hash: self
                    .options
                    .source_commit
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                integrity_status: integrity.status,
                record_counts,
                generation_time_ms: read_ms + compute_ms,
            },
            metrics,
            derived_states,
            activity_history,
            tasks,
            cycles,
            actors,
            feedback,
            enriched_tasks,
        };

        let write_start = Instant::now();
        let cache_size_bytes = self.cache.write(&snapshot)?;
        let write_ms = elapsed_ms(write_start);
        debug!(write_ms, key = self.cache.key(), "Index written");

        Ok(GenerationReport {
            success: true,
            records_processed,
            metrics_calculated: 3,
            derived_states_applied,
            generation_time: PhaseTimings {
                total_ms: elapsed_ms(started),
                read_ms,
                compute_ms,
                write_ms,
            },
            cache_size_bytes,
            cache_strategy: CACHE_STRATEGY.to_string(),
            errors: Vec::new(),
        })
    }

    /// Run the three metrics groups concurrently and merge their top-level keys.
    fn compute_metrics(&self, ledger: &Ledger) -> Result<serde_json::Value> {
        let provider = self.metrics.as_ref();
        let groups = std::thread::scope(|s| {
            let status = s.spawn(|| provider.system_status(ledger));
            let productivity = s.spawn(|| provider.productivity(ledger));
            let collaboration = s.spawn(|| provider.collaboration(ledger));
            Ok::<_, Error>([
                ("systemStatus", join_metric(status)?),
                ("productivity", join_metric(productivity)?),
                ("collaboration", join_metric(collaboration)?),
            ])
        })?;

        Ok(merge_metric_groups(groups))
    }

    /// The cached snapshot if it exists and is fresh.
    pub fn get_index_data(&self) -> Option<IndexSnapshot> {
        self.cache.get_fresh()
    }

    /// Whether a fresh snapshot exists.
    pub fn is_index_up_to_date(&self) -> Result<bool> {
        self.cache.is_up_to_date()
    }

    /// The cached snapshot regardless of freshness.
    pub fn cached_snapshot(&self) -> Result<Option<IndexSnapshot>> {
        self.cache.read()
    }

    /// Drop the snapshot. Succeeds when there is none.
    pub fn invalidate_cache(&self) -> Result<()> {
        self.cache.invalidate()?;
        Ok(())
    }

    /// Run a full integrity scan of the current ledger.
    pub fn validate_integrity(&self) -> Result<IntegrityReport> {
        let ledger = self.load_ledger()?;
        self.validator.validate(&ledger)
    }

    /// Recent activity computed from the current ledger.
    pub fn activity(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        let ledger = self.load_ledger()?;
        let mut events = calculate_activity_history(&ledger);
        events.truncate(limit);
        Ok(events)
    }

    /// Enrich one task against the current ledger.
    pub fn enriched_task(&self, task_id: &str) -> Result<EnrichedTask> {
        let ledger = self.load_ledger()?;
        let lookup = ledger.lookup();
        let task = lookup
            .tasks_by_id
            .get(task_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        let now = Utc::now().timestamp();
        let sets = calculate_derived_states(&lookup, now);
        let derived = sets.lookup();
        let ctx = EnrichmentContext {
            lookup: &lookup,
            derived: &derived,
            now,
        };
        Ok(enrich_task_record(task, &ctx))
    }
}

fn join_metric(
    handle: std::thread::ScopedJoinHandle<'_, Result<serde_json::Value>>,
) -> Result<serde_json::Value> {
    handle
        .join()
        .map_err(|_| Error::Other("metrics thread panicked".to_string()))?
}
