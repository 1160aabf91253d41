//! Data models for Keelson ledger records.
//!
//! Every record on disk is a [`SignedRecord`]: a [`RecordHeader`] carrying the
//! payload checksum and signature trail, plus one of the payload types:
//! - `TaskRecord` - Units of work with status, priority and typed references
//! - `CycleRecord` - Planning containers grouping tasks
//! - `ActorRecord` - Humans and agents with their signing keys
//! - `FeedbackRecord` - Blocking issues, questions, assignments, approvals
//! - `ExecutionRecord` - Work logs attached to a task
//! - `ChangelogRecord` - Release notes listing completed tasks

pub mod ids;
pub mod index;

pub use ids::{created_at_secs, parse_id_timestamp};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current header format version written by record factories.
pub const RECORD_FORMAT_VERSION: &str = "1.0";

/// The kind of payload a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Task,
    Cycle,
    Actor,
    Feedback,
    Execution,
    Changelog,
}

impl RecordKind {
    /// All record kinds, in ledger read order.
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Task,
        RecordKind::Cycle,
        RecordKind::Actor,
        RecordKind::Feedback,
        RecordKind::Execution,
        RecordKind::Changelog,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Cycle => "cycle",
            Self::Actor => "actor",
            Self::Feedback => "feedback",
            Self::Execution => "execution",
            Self::Changelog => "changelog",
        }
    }

    /// Directory (namespace) name used by file-backed stores.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Task => "tasks",
            Self::Cycle => "cycles",
            Self::Actor => "actors",
            Self::Feedback => "feedback",
            Self::Execution => "executions",
            Self::Changelog => "changelogs",
        }
    }

    /// Whether ids of this kind embed a leading creation timestamp.
    pub fn is_time_ordered(&self) -> bool {
        !matches!(self, Self::Actor)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One signature in a record's signature trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Actor id of the signer (e.g., "human:alice")
    pub key_id: String,

    /// Role the signer acted in (e.g., "author", "reviewer")
    pub role: String,

    /// Free-form note attached to the signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Base64-encoded Ed25519 signature
    pub signature: String,

    /// Unix timestamp (seconds) when the signature was made
    pub timestamp: i64,
}

/// Header shared by every signed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHeader {
    /// Record format version
    pub version: String,

    /// Payload kind tag
    #[serde(rename = "type")]
    pub kind: RecordKind,

    /// Hex SHA-256 of the canonical payload JSON
    pub payload_checksum: String,

    /// Signature trail; first entry is the author, last is the last modifier
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl RecordHeader {
    /// The author's signature (first in the trail).
    pub fn first_signature(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    /// The last modifier's signature (last in the trail).
    pub fn last_signature(&self) -> Option<&Signature> {
        self.signatures.last()
    }
}

/// A payload wrapped with its header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedRecord<P> {
    pub header: RecordHeader,
    pub payload: P,
}

/// Payloads that can be addressed by id inside the ledger.
pub trait Payload {
    /// Kind tag stored in the header.
    const KIND: RecordKind;

    /// Globally unique identifier.
    fn id(&self) -> &str;

    /// Display title used in activity streams.
    fn title(&self) -> &str;
}

impl<P: Payload> SignedRecord<P> {
    /// The payload id.
    pub fn id(&self) -> &str {
        self.payload.id()
    }
}

/// Task status in the governance workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Draft,
    Review,
    Ready,
    Active,
    Done,
    Archived,
    Paused,
    Discarded,
}

impl TaskStatus {
    /// Terminal statuses: no further work is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Archived | Self::Discarded)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Done => "done",
            Self::Archived => "archived",
            Self::Paused => "paused",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique identifier (e.g., "1752274500-task-implement-login")
    pub id: String,

    /// Task title
    pub title: String,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// Priority level
    #[serde(default)]
    pub priority: TaskPriority,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,

    /// Typed references (`task:`, `pr:`, `issue:`, `file:`, `url:`)
    #[serde(default)]
    pub references: Vec<String>,

    /// Cycles this task belongs to
    #[serde(default)]
    pub cycle_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskRecord {
    /// Create a new draft task with the given id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            description: String::new(),
            tags: Vec::new(),
            references: Vec::new(),
            cycle_ids: Vec::new(),
            notes: None,
        }
    }

    /// Ids of tasks referenced through `task:` references.
    pub fn task_references(&self) -> impl Iterator<Item = &str> {
        self.references
            .iter()
            .filter_map(|r| r.strip_prefix(TASK_REFERENCE_PREFIX))
    }
}

impl Payload for TaskRecord {
    const KIND: RecordKind = RecordKind::Task;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// Prefix of a reference pointing at another task.
pub const TASK_REFERENCE_PREFIX: &str = "task:";

/// Prefixes recognized as typed references.
pub const TYPED_REFERENCE_PREFIXES: [&str; 5] = ["task:", "pr:", "issue:", "file:", "url:"];

/// Cycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    #[default]
    Planning,
    Active,
    Completed,
    Archived,
}

/// A planning container grouping tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub status: CycleStatus,

    /// Tasks planned in this cycle
    #[serde(default)]
    pub task_ids: Vec<String>,

    /// Nested cycles
    #[serde(default)]
    pub child_cycle_ids: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CycleRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: CycleStatus::default(),
            task_ids: Vec::new(),
            child_cycle_ids: Vec::new(),
            tags: Vec::new(),
            notes: None,
        }
    }
}

impl Payload for CycleRecord {
    const KIND: RecordKind = RecordKind::Cycle;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// Whether an actor is a person or an automated agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    #[default]
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    #[default]
    Active,
    Revoked,
}

/// A human or agent allowed to sign records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRecord {
    /// Actor id (e.g., "human:alice", "agent:reviewer")
    pub id: String,

    #[serde(rename = "type", default)]
    pub actor_type: ActorType,

    pub display_name: String,

    /// Base64-encoded Ed25519 verifying key
    pub public_key: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub status: ActorStatus,
}

impl ActorRecord {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            actor_type: ActorType::default(),
            display_name: display_name.into(),
            public_key: public_key.into(),
            roles: Vec::new(),
            status: ActorStatus::default(),
        }
    }
}

impl Payload for ActorRecord {
    const KIND: RecordKind = RecordKind::Actor;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.display_name
    }
}

/// Feedback classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Blocking,
    Suggestion,
    Question,
    Approval,
    Clarification,
    Assignment,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Suggestion => "suggestion",
            Self::Question => "question",
            Self::Approval => "approval",
            Self::Clarification => "clarification",
            Self::Assignment => "assignment",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
    Wontfix,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Wontfix => "wontfix",
        }
    }
}

/// Feedback left on a task, cycle or other entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: String,

    /// Kind of the target entity (e.g., "task")
    pub entity_type: String,

    /// Id of the target entity
    pub entity_id: String,

    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,

    #[serde(default)]
    pub status: FeedbackStatus,

    #[serde(default)]
    pub content: String,

    /// Assigned actor for `assignment` feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Feedback this entry resolves, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolves_feedback_id: Option<String>,
}

impl FeedbackRecord {
    pub fn new(
        id: impl Into<String>,
        entity_id: impl Into<String>,
        feedback_type: FeedbackType,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: "task".to_string(),
            entity_id: entity_id.into(),
            feedback_type,
            status: FeedbackStatus::default(),
            content: String::new(),
            assignee: None,
            resolves_feedback_id: None,
        }
    }

    /// Open feedback of the given type.
    pub fn is_open(&self, feedback_type: FeedbackType) -> bool {
        self.status == FeedbackStatus::Open && self.feedback_type == feedback_type
    }
}

impl Payload for FeedbackRecord {
    const KIND: RecordKind = RecordKind::Feedback;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.content
    }
}

/// A work log entry attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,

    pub task_id: String,

    /// Execution kind (e.g., "progress", "blocker", "completion")
    #[serde(rename = "type", default)]
    pub execution_type: String,

    pub title: String,

    #[serde(default)]
    pub result: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub references: Vec<String>,
}

impl ExecutionRecord {
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            execution_type: "progress".to_string(),
            title: title.into(),
            result: String::new(),
            notes: None,
            references: Vec::new(),
        }
    }
}

impl Payload for ExecutionRecord {
    const KIND: RecordKind = RecordKind::Execution;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// Release notes listing the tasks a release delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogRecord {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub related_tasks: Vec<String>,

    #[serde(default)]
    pub related_cycles: Vec<String>,

    /// Unix timestamp (seconds) when the release was completed
    #[serde(default)]
    pub completed_at: i64,

    /// Released version (e.g., "v1.2.0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ChangelogRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            related_tasks: Vec::new(),
            related_cycles: Vec::new(),
            completed_at: 0,
            version: None,
        }
    }
}

impl Payload for ChangelogRecord {
    const KIND: RecordKind = RecordKind::Changelog;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Archived.is_terminal());
        assert!(TaskStatus::Discarded.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
    }

    #[test]
    fn test_task_json_uses_camel_case() {
        let mut task = TaskRecord::new("1700000000-task-a", "A");
        task.cycle_ids.push("1700000000-cycle-c".to_string());
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"cycleIds\""));
        assert!(json.contains("\"status\":\"draft\""));
        assert!(!json.contains("notes"));
    }

    #[test]
    fn test_header_type_tag() {
        let header = RecordHeader {
            version: RECORD_FORMAT_VERSION.to_string(),
            kind: RecordKind::Feedback,
            payload_checksum: "abc".to_string(),
            signatures: Vec::new(),
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["type"], "feedback");
        assert_eq!(json["payloadChecksum"], "abc");
    }

    #[test]
    fn test_task_references_filters_task_prefix() {
        let mut task = TaskRecord::new("1700000000-task-a", "A");
        task.references = vec![
            "task:1700000001-task-b".to_string(),
            "pr:42".to_string(),
            "url:https://example.com".to_string(),
        ];
        let refs: Vec<&str> = task.task_references().collect();
        assert_eq!(refs, vec!["1700000001-task-b"]);
    }

    #[test]
    fn test_feedback_deserializes_with_defaults() {
        let json = r#"{"id":"1700000000-feedback-q","entityType":"task","entityId":"t","type":"question"}"#;
        let fb: FeedbackRecord = serde_json::from_str(json).unwrap();
        assert_eq!(fb.status, FeedbackStatus::Open);
        assert!(fb.is_open(FeedbackType::Question));
        assert!(!fb.is_open(FeedbackType::Blocking));
    }
}
