//! Structural record schemas and their compile cache.
//!
//! A schema definition is a small JSON document:
//!
//! ```json
//! {"kind": "task", "required": ["id", "title", "status"], "timeOrderedId": true}
//! ```
//!
//! Definitions are compiled once and cached by the SHA-256 of their
//! canonical JSON, so two identical definitions share one compiled schema.

use crate::models::{RecordHeader, RecordKind, parse_id_timestamp};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Source form of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub kind: RecordKind,

    /// Payload fields that must be present and non-empty
    pub required: Vec<String>,

    /// Whether ids must start with a unix timestamp
    #[serde(default)]
    pub time_ordered_id: bool,
}

impl SchemaDefinition {
    /// The built-in definition for a record kind.
    pub fn builtin(kind: RecordKind) -> Self {
        let required: &[&str] = match kind {
            RecordKind::Task => &["id", "title", "status"],
            RecordKind::Cycle => &["id", "title"],
            RecordKind::Actor => &["id", "displayName", "publicKey"],
            RecordKind::Feedback => &["id", "entityId", "type"],
            RecordKind::Execution => &["id", "taskId"],
            RecordKind::Changelog => &["id", "title"],
        };
        Self {
            kind,
            required: required.iter().map(|s| s.to_string()).collect(),
            time_ordered_id: kind.is_time_ordered(),
        }
    }

    /// Cache key: hex SHA-256 of the canonical definition JSON.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&serde_json::to_value(self)?)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

/// A schema ready to check records.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    kind: RecordKind,
    required: Vec<String>,
    time_ordered_id: bool,
}

impl CompiledSchema {
    pub fn compile(definition: &SchemaDefinition) -> Result<Self> {
        if definition.required.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "{} schema names an empty field",
                definition.kind
            )));
        }
        Ok(Self {
            kind: definition.kind,
            required: definition.required.clone(),
            time_ordered_id: definition.time_ordered_id,
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Structural violations of one record, as messages. Empty when valid.
    pub fn check(&self, header: &RecordHeader, payload: &serde_json::Value) -> Vec<String> {
        let mut violations = Vec::new();

        if header.version.trim().is_empty() {
            violations.push("header version is missing".to_string());
        }
        if header.payload_checksum.trim().is_empty() {
            violations.push("header payload checksum is missing".to_string());
        }
        if header.signatures.is_empty() {
            violations.push("record has no signatures".to_string());
        }
        if header.kind != self.kind {
            violations.push(format!(
                "header type is {} but record is stored as {}",
                header.kind, self.kind
            ));
        }

        for field in &self.required {
            if !is_present(payload.get(field)) {
                violations.push(format!("required field '{}' is missing or empty", field));
            }
        }

        if self.time_ordered_id {
            if let Some(id) = payload.get("id").and_then(|v| v.as_str()) {
                if let Err(e) = parse_id_timestamp(id) {
                    violations.push(e.to_string());
                }
            }
        }

        violations
    }
}

fn is_present(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Compiled schemas keyed by definition fingerprint.
#[derive(Debug, Default)]
pub struct SchemaCache {
    compiled: Mutex<HashMap<String, Arc<CompiledSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled form of `definition`, compiling it on first use.
    pub fn get_or_compile(&self, definition: &SchemaDefinition) -> Result<Arc<CompiledSchema>> {
        let key = definition.fingerprint()?;
        let mut compiled = self
            .compiled
            .lock()
            .map_err(|_| Error::Other("schema cache lock poisoned".to_string()))?;
        if let Some(schema) = compiled.get(&key) {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(CompiledSchema::compile(definition)?);
        compiled.insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// Number of distinct compiled schemas.
    pub fn len(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RECORD_FORMAT_VERSION, Signature};
    use serde_json::json;

    fn header(kind: RecordKind) -> RecordHeader {
        RecordHeader {
            version: RECORD_FORMAT_VERSION.to_string(),
            kind,
            payload_checksum: "abc".to_string(),
            signatures: vec![Signature {
                key_id: "human:alice".to_string(),
                role: "author".to_string(),
                notes: None,
                signature: "sig".to_string(),
                timestamp: 1_700_000_000,
            }],
        }
    }

    fn task_schema() -> CompiledSchema {
        CompiledSchema::compile(&SchemaDefinition::builtin(RecordKind::Task)).unwrap()
    }

    #[test]
    fn test_valid_task_has_no_violations() {
        let payload = json!({"id": "1700000000-task-a", "title": "A", "status": "draft"});
        assert!(task_schema().check(&header(RecordKind::Task), &payload).is_empty());
    }

    #[test]
    fn test_missing_fields_and_signatures() {
        let mut h = header(RecordKind::Task);
        h.signatures.clear();
        h.payload_checksum.clear();
        let payload = json!({"id": "1700000000-task-a", "title": "  "});

        let violations = task_schema().check(&h, &payload);
        assert_eq!(violations.len(), 4);
        assert!(violations.iter().any(|v| v.contains("no signatures")));
        assert!(violations.iter().any(|v| v.contains("'title'")));
        assert!(violations.iter().any(|v| v.contains("'status'")));
    }

    #[test]
    fn test_malformed_time_ordered_id() {
        let payload = json!({"id": "task-a", "title": "A", "status": "draft"});
        let violations = task_schema().check(&header(RecordKind::Task), &payload);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_actor_ids_are_not_time_ordered() {
        let schema =
            CompiledSchema::compile(&SchemaDefinition::builtin(RecordKind::Actor)).unwrap();
        let payload = json!({"id": "human:alice", "displayName": "Alice", "publicKey": "k"});
        assert!(schema.check(&header(RecordKind::Actor), &payload).is_empty());
    }

    #[test]
    fn test_cache_compiles_each_definition_once() {
        let cache = SchemaCache::new();
        let a = cache
            .get_or_compile(&SchemaDefinition::builtin(RecordKind::Task))
            .unwrap();
        let b = cache
            .get_or_compile(&SchemaDefinition::builtin(RecordKind::Task))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache
            .get_or_compile(&SchemaDefinition::builtin(RecordKind::Cycle))
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let definition = SchemaDefinition {
            kind: RecordKind::Task,
            required: vec![String::new()],
            time_ordered_id: true,
        };
        assert!(CompiledSchema::compile(&definition).is_err());
    }
}
