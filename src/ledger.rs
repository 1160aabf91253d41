//! In-memory view of the whole ledger for one indexing pass.
//!
//! Records are flat values addressed by string id. Cross references are
//! resolved through [`LedgerLookup`], which is built once per pass and
//! borrows from the loaded [`Ledger`].

use crate::models::{
    ActorRecord, ChangelogRecord, CycleRecord, ExecutionRecord, FeedbackRecord, Payload,
    RecordKind, SignedRecord, TaskRecord,
};
use crate::storage::{Namespace, RecordStore};
use crate::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A record exactly as it sits in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub kind: RecordKind,

    /// Store key, normally the payload id
    pub key: String,

    /// The whole stored document (`header` and `payload`)
    pub document: serde_json::Value,

    /// Why the document could not be decoded into its typed form, if it could not
    pub decode_error: Option<String>,
}

impl StoredRecord {
    /// The raw stored payload, `Null` when absent.
    pub fn payload(&self) -> &serde_json::Value {
        self.document.get("payload").unwrap_or(&serde_json::Value::Null)
    }

    /// Payload id when present, else the store key.
    pub fn id(&self) -> &str {
        self.payload()
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.key)
    }
}

/// Every record of the ledger, loaded once.
///
/// The typed views hold the records that decode. `stored` keeps every
/// document read from the store, including those that do not decode.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub tasks: Vec<SignedRecord<TaskRecord>>,
    pub cycles: Vec<SignedRecord<CycleRecord>>,
    pub actors: Vec<SignedRecord<ActorRecord>>,
    pub feedback: Vec<SignedRecord<FeedbackRecord>>,
    pub executions: Vec<SignedRecord<ExecutionRecord>>,
    pub changelogs: Vec<SignedRecord<ChangelogRecord>>,
    pub stored: Vec<StoredRecord>,
}

impl Ledger {
    /// Read every record from the store. The six kinds are read concurrently.
    ///
    /// Documents that do not decode are left out of the typed views and
    /// kept in `stored` with their decode error.
    pub fn load(store: &dyn RecordStore) -> Result<Self> {
        std::thread::scope(|s| {
            let tasks = s.spawn(|| load_kind::<TaskRecord>(store));
            let cycles = s.spawn(|| load_kind::<CycleRecord>(store));
            let actors = s.spawn(|| load_kind::<ActorRecord>(store));
            let feedback = s.spawn(|| load_kind::<FeedbackRecord>(store));
            let executions = s.spawn(|| load_kind::<ExecutionRecord>(store));
            let changelogs = s.spawn(|| load_kind::<ChangelogRecord>(store));

            let mut stored = Vec::new();
            let (tasks, raw) = join(tasks)?;
            stored.extend(raw);
            let (cycles, raw) = join(cycles)?;
            stored.extend(raw);
            let (actors, raw) = join(actors)?;
            stored.extend(raw);
            let (feedback, raw) = join(feedback)?;
            stored.extend(raw);
            let (executions, raw) = join(executions)?;
            stored.extend(raw);
            let (changelogs, raw) = join(changelogs)?;
            stored.extend(raw);

            Ok(Self {
                tasks,
                cycles,
                actors,
                feedback,
                executions,
                changelogs,
                stored,
            })
        })
    }

    /// The documents to verify.
    ///
    /// A loaded ledger returns what was read from the store. A ledger
    /// assembled in memory has no stored form, so its typed records are
    /// serialized in their place.
    pub fn documents(&self) -> Result<Cow<'_, [StoredRecord]>> {
        if !self.stored.is_empty() || self.total() == 0 {
            return Ok(Cow::Borrowed(&self.stored));
        }
        let mut documents = Vec::with_capacity(self.total());
        serialize_into(&mut documents, &self.tasks)?;
        serialize_into(&mut documents, &self.cycles)?;
        serialize_into(&mut documents, &self.actors)?;
        serialize_into(&mut documents, &self.feedback)?;
        serialize_into(&mut documents, &self.executions)?;
        serialize_into(&mut documents, &self.changelogs)?;
        Ok(Cow::Owned(documents))
    }

    /// Stored documents that did not decode.
    pub fn rejected(&self) -> impl Iterator<Item = &StoredRecord> {
        self.stored.iter().filter(|r| r.decode_error.is_some())
    }

    /// Number of records of each kind, keyed by kind name.
    pub fn record_counts(&self) -> BTreeMap<String, usize> {
        RecordKind::ALL
            .into_iter()
            .map(|kind| (kind.dir_name().to_string(), self.count(kind)))
            .collect()
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Task => self.tasks.len(),
            RecordKind::Cycle => self.cycles.len(),
            RecordKind::Actor => self.actors.len(),
            RecordKind::Feedback => self.feedback.len(),
            RecordKind::Execution => self.executions.len(),
            RecordKind::Changelog => self.changelogs.len(),
        }
    }

    /// Total number of records.
    pub fn total(&self) -> usize {
        RecordKind::ALL.into_iter().map(|kind| self.count(kind)).sum()
    }

    /// Build the id lookup tables for this ledger.
    pub fn lookup(&self) -> LedgerLookup<'_> {
        LedgerLookup::new(self)
    }
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| Error::Other("record reader thread panicked".to_string()))?
}

fn serialize_into<P>(out: &mut Vec<StoredRecord>, records: &[SignedRecord<P>]) -> Result<()>
where
    P: Payload + serde::Serialize,
{
    for record in records {
        out.push(StoredRecord {
            kind: P::KIND,
            key: record.id().to_string(),
            document: serde_json::to_value(record)?,
            decode_error: None,
        });
    }
    Ok(())
}

/// Read every document of one kind and decode those that can be decoded.
pub fn load_kind<P>(store: &dyn RecordStore) -> Result<(Vec<SignedRecord<P>>, Vec<StoredRecord>)>
where
    P: Payload + DeserializeOwned,
{
    let ns = Namespace::Records(P::KIND);
    let mut records = Vec::new();
    let mut stored = Vec::new();
    for key in store.list(ns)? {
        // Listed keys can disappear between list and get; skip them.
        let Some(document) = store.get(ns, &key)? else {
            continue;
        };
        let decode_error = match SignedRecord::<P>::deserialize(&document) {
            Ok(record) => {
                records.push(record);
                None
            }
            Err(e) => {
                warn!(namespace = %ns, key = %key, error = %e, "Skipping malformed record");
                Some(e.to_string())
            }
        };
        stored.push(StoredRecord {
            kind: P::KIND,
            key,
            document,
            decode_error,
        });
    }
    Ok((records, stored))
}

/// Read and decode every record of one kind, skipping malformed documents.
pub fn read_all<P>(store: &dyn RecordStore) -> Result<Vec<SignedRecord<P>>>
where
    P: Payload + DeserializeOwned,
{
    Ok(load_kind::<P>(store)?.0)
}

/// Write a record under its own id.
pub fn write_record<P>(store: &dyn RecordStore, record: &SignedRecord<P>) -> Result<()>
where
    P: Payload + serde::Serialize,
{
    let value = serde_json::to_value(record)?;
    store.put(Namespace::Records(P::KIND), record.payload.id(), &value)
}

/// Id-indexed tables over a [`Ledger`].
#[derive(Debug)]
pub struct LedgerLookup<'a> {
    pub ledger: &'a Ledger,
    pub tasks_by_id: HashMap<&'a str, &'a SignedRecord<TaskRecord>>,
    pub cycles_by_id: HashMap<&'a str, &'a SignedRecord<CycleRecord>>,
    pub actors_by_id: HashMap<&'a str, &'a SignedRecord<ActorRecord>>,
    /// Feedback grouped by target entity id
    pub feedback_by_entity: HashMap<&'a str, Vec<&'a SignedRecord<FeedbackRecord>>>,
    /// Executions grouped by task id
    pub executions_by_task: HashMap<&'a str, Vec<&'a SignedRecord<ExecutionRecord>>>,
    /// Changelogs grouped by related task id
    pub changelogs_by_task: HashMap<&'a str, Vec<&'a SignedRecord<ChangelogRecord>>>,
    /// Cycles grouped by the task ids they list
    pub cycles_by_task: HashMap<&'a str, Vec<&'a SignedRecord<CycleRecord>>>,
    /// Non-terminal tasks grouped by the task ids they reference
    pub open_referrers: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> LedgerLookup<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        let mut lookup = Self {
            ledger,
            tasks_by_id: HashMap::with_capacity(ledger.tasks.len()),
            cycles_by_id: HashMap::with_capacity(ledger.cycles.len()),
            actors_by_id: HashMap::with_capacity(ledger.actors.len()),
            feedback_by_entity: HashMap::new(),
            executions_by_task: HashMap::new(),
            changelogs_by_task: HashMap::new(),
            cycles_by_task: HashMap::new(),
            open_referrers: HashMap::new(),
        };

        for task in &ledger.tasks {
            lookup.tasks_by_id.insert(task.id(), task);
            if !task.payload.status.is_terminal() {
                for target in task.payload.task_references() {
                    lookup
                        .open_referrers
                        .entry(target)
                        .or_default()
                        .push(task.id());
                }
            }
        }
        for cycle in &ledger.cycles {
            lookup.cycles_by_id.insert(cycle.id(), cycle);
            for task_id in &cycle.payload.task_ids {
                lookup
                    .cycles_by_task
                    .entry(task_id.as_str())
                    .or_default()
                    .push(cycle);
            }
        }
        for actor in &ledger.actors {
            lookup.actors_by_id.insert(actor.id(), actor);
        }
        for feedback in &ledger.feedback {
            lookup
                .feedback_by_entity
                .entry(feedback.payload.entity_id.as_str())
                .or_default()
                .push(feedback);
        }
        for execution in &ledger.executions {
            lookup
                .executions_by_task
                .entry(execution.payload.task_id.as_str())
                .or_default()
                .push(execution);
        }
        for changelog in &ledger.changelogs {
            for task_id in &changelog.payload.related_tasks {
                lookup
                    .changelogs_by_task
                    .entry(task_id.as_str())
                    .or_default()
                    .push(changelog);
            }
        }

        lookup
    }

    /// Feedback targeting an entity.
    pub fn feedback_for(&self, entity_id: &str) -> &[&'a SignedRecord<FeedbackRecord>] {
        self.feedback_by_entity
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Executions recorded against a task.
    pub fn executions_for(&self, task_id: &str) -> &[&'a SignedRecord<ExecutionRecord>] {
        self.executions_by_task
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Changelogs listing a task.
    pub fn changelogs_for(&self, task_id: &str) -> &[&'a SignedRecord<ChangelogRecord>] {
        self.changelogs_by_task
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Base64 public keys of all loaded actors, keyed by actor id.
    pub fn public_keys(&self) -> HashMap<String, String> {
        self.ledger
            .actors
            .iter()
            .map(|a| (a.payload.id.clone(), a.payload.public_key.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RECORD_FORMAT_VERSION, RecordHeader, TaskStatus};
    use crate::storage::MemoryRecordStore;

    fn unsigned<P: Payload>(payload: P) -> SignedRecord<P> {
        SignedRecord {
            header: RecordHeader {
                version: RECORD_FORMAT_VERSION.to_string(),
                kind: P::KIND,
                payload_checksum: String::new(),
                signatures: Vec::new(),
            },
            payload,
        }
    }

    #[test]
    fn test_load_empty_store() {
        let store = MemoryRecordStore::new();
        let ledger = Ledger::load(&store).unwrap();
        assert_eq!(ledger.total(), 0);
        assert_eq!(ledger.record_counts().len(), 6);
    }

    #[test]
    fn test_load_reads_every_kind() {
        let store = MemoryRecordStore::new();
        write_record(&store, &unsigned(TaskRecord::new("1700000000-task-a", "A"))).unwrap();
        write_record(&store, &unsigned(CycleRecord::new("1700000000-cycle-c", "C"))).unwrap();
        write_record(
            &store,
            &unsigned(ExecutionRecord::new("1700000001-exec-e", "1700000000-task-a", "E")),
        )
        .unwrap();

        let ledger = Ledger::load(&store).unwrap();
        assert_eq!(ledger.tasks.len(), 1);
        assert_eq!(ledger.cycles.len(), 1);
        assert_eq!(ledger.executions.len(), 1);
        assert_eq!(ledger.total(), 3);
        assert_eq!(ledger.record_counts()["tasks"], 1);
    }

    #[test]
    fn test_load_keeps_malformed_record_out_of_typed_views() {
        let store = MemoryRecordStore::new();
        write_record(&store, &unsigned(TaskRecord::new("1700000000-task-a", "A"))).unwrap();
        store
            .put(
                Namespace::Records(RecordKind::Task),
                "1700000000-task-bad",
                &serde_json::json!({"header": 1}),
            )
            .unwrap();

        let ledger = Ledger::load(&store).unwrap();
        assert_eq!(ledger.tasks.len(), 1);
        assert_eq!(ledger.stored.len(), 2);
        let rejected: Vec<_> = ledger.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].key, "1700000000-task-bad");
        assert_eq!(rejected[0].id(), "1700000000-task-bad");
    }

    #[test]
    fn test_stored_document_keeps_unknown_payload_fields() {
        let store = MemoryRecordStore::new();
        let ns = Namespace::Records(RecordKind::Task);
        write_record(&store, &unsigned(TaskRecord::new("1700000000-task-a", "A"))).unwrap();
        let mut document = store.get(ns, "1700000000-task-a").unwrap().unwrap();
        document["payload"]["approvedBy"] = serde_json::json!("mallory");
        store.put(ns, "1700000000-task-a", &document).unwrap();

        let ledger = Ledger::load(&store).unwrap();
        assert_eq!(ledger.tasks.len(), 1);
        assert_eq!(ledger.stored[0].payload()["approvedBy"], "mallory");
    }

    #[test]
    fn test_documents_of_in_memory_ledger() {
        let mut ledger = Ledger::default();
        assert!(ledger.documents().unwrap().is_empty());

        ledger.tasks.push(unsigned(TaskRecord::new("1700000000-task-a", "A")));
        let documents = ledger.documents().unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].kind, RecordKind::Task);
        assert_eq!(documents[0].payload()["title"], "A");
    }

    #[test]
    fn test_lookup_tracks_open_referrers_only() {
        let mut ledger = Ledger::default();
        let target = TaskRecord::new("1700000000-task-target", "Target");
        let mut open = TaskRecord::new("1700000001-task-open", "Open");
        open.references.push("task:1700000000-task-target".to_string());
        let mut done = TaskRecord::new("1700000002-task-done", "Done");
        done.status = TaskStatus::Done;
        done.references.push("task:1700000000-task-target".to_string());
        ledger.tasks = vec![unsigned(target), unsigned(open), unsigned(done)];

        let lookup = ledger.lookup();
        assert_eq!(
            lookup.open_referrers.get("1700000000-task-target"),
            Some(&vec!["1700000001-task-open"])
        );
        assert!(lookup.feedback_for("1700000000-task-target").is_empty());
    }
}
