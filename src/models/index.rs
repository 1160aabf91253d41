//! Read-model types persisted in the index snapshot.

use super::{ActorRecord, CycleRecord, FeedbackRecord, SignedRecord, TaskRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Snapshot format version.
pub const INDEX_FORMAT_VERSION: &str = "1.0.0";

/// The consolidated, cached read model of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub metadata: IndexMetadata,

    /// Metrics merged verbatim from the metrics provider
    pub metrics: serde_json::Value,

    pub derived_states: DerivedStateSets,

    pub activity_history: Vec<ActivityEvent>,

    pub tasks: Vec<SignedRecord<TaskRecord>>,

    pub cycles: Vec<SignedRecord<CycleRecord>>,

    pub actors: Vec<SignedRecord<ActorRecord>>,

    pub feedback: Vec<SignedRecord<FeedbackRecord>>,

    pub enriched_tasks: Vec<EnrichedTask>,
}

/// Generation metadata stored alongside the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub version: String,

    /// When the generation pass started
    pub generated_at: DateTime<Utc>,

    /// Source commit of the ledger at generation time ("unknown" if unavailable)
    pub last_commit_hash: String,

    pub integrity_status: IntegrityStatus,

    /// Record counts keyed by record kind
    pub record_counts: BTreeMap<String, usize>,

    pub generation_time_ms: u64,
}

/// The four system-wide derived-state sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStateSets {
    pub stalled_tasks: Vec<String>,
    pub at_risk_tasks: Vec<String>,
    pub needs_clarification_tasks: Vec<String>,
    pub blocked_by_dependency_tasks: Vec<String>,
}

impl DerivedStateSets {
    /// Total number of derived-state memberships.
    pub fn total(&self) -> usize {
        self.stalled_tasks.len()
            + self.at_risk_tasks.len()
            + self.needs_clarification_tasks.len()
            + self.blocked_by_dependency_tasks.len()
    }

    /// Build hash sets for O(1) membership tests.
    pub fn lookup(&self) -> DerivedStateLookup<'_> {
        DerivedStateLookup {
            stalled: self.stalled_tasks.iter().map(String::as_str).collect(),
            at_risk: self.at_risk_tasks.iter().map(String::as_str).collect(),
            needs_clarification: self
                .needs_clarification_tasks
                .iter()
                .map(String::as_str)
                .collect(),
            blocked_by_dependency: self
                .blocked_by_dependency_tasks
                .iter()
                .map(String::as_str)
                .collect(),
        }
    }
}

/// Borrowed set view over [`DerivedStateSets`].
#[derive(Debug, Default)]
pub struct DerivedStateLookup<'a> {
    pub stalled: HashSet<&'a str>,
    pub at_risk: HashSet<&'a str>,
    pub needs_clarification: HashSet<&'a str>,
    pub blocked_by_dependency: HashSet<&'a str>,
}

/// Activity event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    TaskCreated,
    CycleCreated,
    FeedbackCreated,
    ExecutionCreated,
    ChangelogCreated,
    ActorCreated,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::CycleCreated => "cycle_created",
            Self::FeedbackCreated => "feedback_created",
            Self::ExecutionCreated => "execution_created",
            Self::ChangelogCreated => "changelog_created",
            Self::ActorCreated => "actor_created",
        }
    }
}

/// One entry of the activity stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Unix seconds
    pub timestamp: i64,

    #[serde(rename = "type")]
    pub event_type: ActivityType,

    pub entity_id: String,

    pub entity_title: String,

    /// Author of the record, when signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// What most recently touched a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastActivityType {
    TaskCreated,
    TaskModified,
    FeedbackReceived,
    ExecutionAdded,
    ChangelogCreated,
}

/// A task payload annotated with relationships, metrics and health.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedTask {
    #[serde(flatten)]
    pub task: TaskRecord,

    pub derived_state: TaskDerivedState,

    pub relationships: TaskRelationships,

    pub metrics: TaskMetrics,

    pub release: ReleaseInfo,

    /// Epoch milliseconds
    pub last_updated: i64,

    pub last_activity_type: LastActivityType,

    pub recent_activity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDerivedState {
    pub is_stalled: bool,
    pub is_at_risk: bool,
    pub needs_clarification: bool,
    pub is_blocked_by_dependency: bool,

    /// 0-100, higher is healthier
    pub health_score: u8,

    /// Whole days since the last update
    pub time_in_current_stage: u64,
}

/// A signer taken from a record's signature trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInfo {
    pub actor_id: String,
    pub role: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub actor_id: String,

    /// Unix seconds of the assignment feedback
    pub assigned_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRelationships {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<SignerInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<SignerInfo>,

    pub assigned_to: Vec<Assignment>,

    pub depends_on: Vec<String>,

    pub blocked_by: Vec<String>,

    pub cycles: Vec<CycleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub execution_count: usize,
    pub blocking_feedback_count: usize,
    pub open_question_count: usize,

    /// Hours from creation to the last update, for done tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_resolution: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub is_released: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_release_version: Option<String>,
}

/// Overall integrity verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    #[default]
    Valid,
    /// Reserved for non-fatal findings
    Warnings,
    Errors,
}

impl IntegrityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Warnings => "warnings",
            Self::Errors => "errors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    SchemaViolation,
    ChecksumFailure,
    SignatureInvalid,
}

/// One integrity problem found in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityFinding {
    #[serde(rename = "type")]
    pub kind: FindingKind,

    pub record_id: String,

    pub message: String,

    /// Checksum stored in the header (checksum failures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    /// Checksum recomputed from the payload (checksum failures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

/// Result of a full ledger integrity scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub records_scanned: usize,
    pub checksum_failures: usize,
    pub signature_failures: usize,
    pub errors: Vec<IntegrityFinding>,
    pub warnings: Vec<IntegrityFinding>,
}

impl IntegrityReport {
    /// Findings of one kind.
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &IntegrityFinding> {
        self.errors.iter().filter(move |f| f.kind == kind)
    }
}
