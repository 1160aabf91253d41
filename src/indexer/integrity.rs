//! Ledger integrity scan: schema, checksum and signature checks.
//!
//! Findings are data. Malformed documents, including ones that do not
//! decode into their typed record, become schema violations. The scan only
//! fails on internal errors (a schema that does not compile).

use super::schema::{SchemaCache, SchemaDefinition};
use crate::Result;
use crate::crypto::{IntegrityPrimitives, KeyResolver};
use crate::ledger::{Ledger, StoredRecord};
use crate::models::RecordHeader;
use crate::models::index::{FindingKind, IntegrityFinding, IntegrityReport, IntegrityStatus};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Validates every record of a ledger.
pub struct IntegrityValidator {
    primitives: Arc<dyn IntegrityPrimitives>,
    schemas: SchemaCache,
}

impl std::fmt::Debug for IntegrityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityValidator")
            .field("schemas", &self.schemas)
            .finish_non_exhaustive()
    }
}

impl IntegrityValidator {
    pub fn new(primitives: Arc<dyn IntegrityPrimitives>) -> Self {
        Self {
            primitives,
            schemas: SchemaCache::new(),
        }
    }

    /// Scan the whole ledger. Signer keys are resolved from its actors.
    ///
    /// Checks run on the documents as stored, so payload fields the typed
    /// records do not model still count toward the checksum.
    pub fn validate(&self, ledger: &Ledger) -> Result<IntegrityReport> {
        let keys = ledger.lookup().public_keys();
        let mut report = IntegrityReport::default();

        for record in ledger.documents()?.iter() {
            self.check(record, &keys, &mut report)?;
        }

        report.status = if report.errors.is_empty() {
            IntegrityStatus::Valid
        } else {
            IntegrityStatus::Errors
        };
        debug!(
            records = report.records_scanned,
            findings = report.errors.len(),
            status = report.status.as_str(),
            "Integrity scan finished"
        );
        Ok(report)
    }

    fn check(
        &self,
        record: &StoredRecord,
        keys: &dyn KeyResolver,
        report: &mut IntegrityReport,
    ) -> Result<()> {
        let schema = self
            .schemas
            .get_or_compile(&SchemaDefinition::builtin(record.kind))?;
        report.records_scanned += 1;
        let kind = record.kind;
        let id = record.id();

        let header = match record.document.get("header").map(RecordHeader::deserialize) {
            Some(Ok(header)) => header,
            Some(Err(e)) => {
                report.errors.push(schema_violation(
                    record,
                    format!("header is malformed: {}", e),
                ));
                return Ok(());
            }
            None => {
                report
                    .errors
                    .push(schema_violation(record, "record has no header".to_string()));
                return Ok(());
            }
        };
        let payload = record.payload();

        let mut violations = schema.check(&header, payload);
        if violations.is_empty() {
            if let Some(e) = &record.decode_error {
                violations.push(format!("payload does not decode: {}", e));
            }
        }
        for violation in violations {
            report.errors.push(schema_violation(record, violation));
        }

        let actual = self.primitives.checksum(payload)?;
        if actual != header.payload_checksum {
            report.checksum_failures += 1;
            report.errors.push(IntegrityFinding {
                kind: FindingKind::ChecksumFailure,
                record_id: id.to_string(),
                message: format!(
                    "{} {}: payload checksum mismatch (expected {}, actual {})",
                    kind, id, header.payload_checksum, actual
                ),
                expected: Some(header.payload_checksum.clone()),
                actual: Some(actual),
            });
        }

        // Unsigned records were already reported as schema violations.
        if !header.signatures.is_empty() && !self.primitives.verify_signatures(&header, keys) {
            report.signature_failures += 1;
            let signers: Vec<&str> = header
                .signatures
                .iter()
                .map(|s| s.key_id.as_str())
                .collect();
            report.errors.push(IntegrityFinding {
                kind: FindingKind::SignatureInvalid,
                record_id: id.to_string(),
                message: format!(
                    "{} {}: signature verification failed (signers: {})",
                    kind,
                    id,
                    signers.join(", ")
                ),
                expected: None,
                actual: None,
            });
        }
        Ok(())
    }
}

fn schema_violation(record: &StoredRecord, violation: String) -> IntegrityFinding {
    IntegrityFinding {
        kind: FindingKind::SchemaViolation,
        record_id: record.id().to_string(),
        message: format!("{} {}: {}", record.kind, record.key, violation),
        expected: None,
        actual: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Primitives, add_signature};
    use crate::indexer::test_fixtures::*;
    use crate::ledger::write_record;
    use crate::models::{FeedbackType, RecordKind, TaskStatus};
    use crate::storage::{MemoryRecordStore, Namespace, RecordStore};

    fn validator() -> IntegrityValidator {
        IntegrityValidator::new(Arc::new(Ed25519Primitives))
    }

    fn healthy_ledger() -> Ledger {
        let mut ledger = Ledger::default();
        let task = task_at(NOW - 100, "a", TaskStatus::Active);
        ledger
            .executions
            .push(execution_at(NOW - 50, "e", &task.payload.id));
        ledger
            .feedback
            .push(feedback_at(NOW - 40, "f", &task.payload.id, FeedbackType::Question));
        ledger.cycles.push(cycle_at(NOW - 200, "c", &[&task.payload.id]));
        ledger
            .changelogs
            .push(changelog_at(NOW - 10, "r", &[&task.payload.id]));
        ledger.tasks.push(task);
        ledger.actors.push(alice_actor());
        ledger
    }

    #[test]
    fn test_healthy_ledger_is_valid() {
        let ledger = healthy_ledger();
        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.status, IntegrityStatus::Valid, "{:?}", report.errors);
        assert_eq!(report.records_scanned, 6);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_empty_ledger_is_valid() {
        let report = validator().validate(&Ledger::default()).unwrap();
        assert_eq!(report.status, IntegrityStatus::Valid);
        assert_eq!(report.records_scanned, 0);
    }

    #[test]
    fn test_tampered_payload_is_one_checksum_failure() {
        let mut ledger = healthy_ledger();
        ledger.tasks[0].payload.title = "tampered".to_string();

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.status, IntegrityStatus::Errors);
        assert_eq!(report.checksum_failures, 1);
        let failures: Vec<_> = report.findings_of(FindingKind::ChecksumFailure).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].record_id, ledger.tasks[0].payload.id);
        assert!(failures[0].message.contains(&ledger.tasks[0].payload.id));
        assert_eq!(
            failures[0].expected.as_deref(),
            Some(ledger.tasks[0].header.payload_checksum.as_str())
        );
        // The signature still covers the stored checksum.
        assert_eq!(report.signature_failures, 0);
    }

    #[test]
    fn test_unknown_signer_is_signature_invalid() {
        let mut ledger = healthy_ledger();
        add_signature(&mut ledger.tasks[0], &bob_key(), BOB, "reviewer", NOW);

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.signature_failures, 1);
        let finding = report
            .findings_of(FindingKind::SignatureInvalid)
            .next()
            .unwrap();
        assert!(finding.message.contains(BOB));

        ledger.actors.push(bob_actor());
        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.status, IntegrityStatus::Valid, "{:?}", report.errors);
    }

    #[test]
    fn test_forged_signature_is_signature_invalid() {
        let mut ledger = healthy_ledger();
        ledger.actors.push(bob_actor());
        // Bob signs, but claims to be Alice.
        add_signature(&mut ledger.tasks[0], &bob_key(), ALICE, "reviewer", NOW);

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.signature_failures, 1);
    }

    #[test]
    fn test_unsigned_record_is_schema_violation_only() {
        let mut ledger = healthy_ledger();
        ledger.executions[0].header.signatures.clear();

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.status, IntegrityStatus::Errors);
        assert_eq!(report.signature_failures, 0);
        let violations: Vec<_> = report.findings_of(FindingKind::SchemaViolation).collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].record_id, ledger.executions[0].payload.id);
    }

    #[test]
    fn test_malformed_id_is_schema_violation() {
        let mut ledger = Ledger::default();
        ledger
            .tasks
            .push(signed(crate::models::TaskRecord::new("no-timestamp", "x")));

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.findings_of(FindingKind::SchemaViolation).count(), 1);
        assert_eq!(report.checksum_failures, 0);
    }

    /// Store `healthy_ledger()` and hand back the store.
    fn stored_ledger() -> MemoryRecordStore {
        let store = MemoryRecordStore::new();
        let ledger = healthy_ledger();
        write_record(&store, &ledger.tasks[0]).unwrap();
        write_record(&store, &ledger.cycles[0]).unwrap();
        write_record(&store, &ledger.actors[0]).unwrap();
        write_record(&store, &ledger.feedback[0]).unwrap();
        write_record(&store, &ledger.executions[0]).unwrap();
        write_record(&store, &ledger.changelogs[0]).unwrap();
        store
    }

    fn edit_stored_task(
        store: &MemoryRecordStore,
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> String {
        let ns = Namespace::Records(RecordKind::Task);
        let key = store.list(ns).unwrap().remove(0);
        let mut document = store.get(ns, &key).unwrap().unwrap();
        edit(&mut document["payload"]);
        store.put(ns, &key, &document).unwrap();
        key
    }

    #[test]
    fn test_stored_ledger_is_valid() {
        let store = stored_ledger();
        let report = validator().validate(&Ledger::load(&store).unwrap()).unwrap();
        assert_eq!(report.status, IntegrityStatus::Valid, "{:?}", report.errors);
        assert_eq!(report.records_scanned, 6);
    }

    #[test]
    fn test_injected_payload_field_is_checksum_failure() {
        let store = stored_ledger();
        let key = edit_stored_task(&store, |payload| {
            payload["approvedBy"] = serde_json::json!("mallory");
        });

        let report = validator().validate(&Ledger::load(&store).unwrap()).unwrap();
        assert_eq!(report.status, IntegrityStatus::Errors);
        assert_eq!(report.checksum_failures, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FindingKind::ChecksumFailure);
        assert_eq!(report.errors[0].record_id, key);
    }

    #[test]
    fn test_undecodable_record_is_schema_violation() {
        let store = stored_ledger();
        let key = edit_stored_task(&store, |payload| {
            payload.as_object_mut().unwrap().remove("title");
        });

        let ledger = Ledger::load(&store).unwrap();
        assert!(ledger.tasks.is_empty());

        let report = validator().validate(&ledger).unwrap();
        assert_eq!(report.records_scanned, 6);
        let violations: Vec<_> = report.findings_of(FindingKind::SchemaViolation).collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].record_id, key);
        assert!(violations[0].message.contains(&key));
        assert!(violations[0].message.contains("'title'"));
    }

    #[test]
    fn test_missing_defaulted_field_is_schema_violation() {
        let store = stored_ledger();
        edit_stored_task(&store, |payload| {
            payload.as_object_mut().unwrap().remove("status");
        });

        // The typed view falls back to the default status...
        let ledger = Ledger::load(&store).unwrap();
        assert_eq!(ledger.tasks[0].payload.status, TaskStatus::Draft);

        // ...but the stored payload is still missing it.
        let report = validator().validate(&ledger).unwrap();
        let violations: Vec<_> = report.findings_of(FindingKind::SchemaViolation).collect();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("'status'"));
        assert_eq!(report.checksum_failures, 1);
    }

    #[test]
    fn test_malformed_header_is_schema_violation() {
        let store = stored_ledger();
        let ns = Namespace::Records(RecordKind::Execution);
        let key = store.list(ns).unwrap().remove(0);
        let mut document = store.get(ns, &key).unwrap().unwrap();
        document["header"] = serde_json::json!("not a header");
        store.put(ns, &key, &document).unwrap();

        let report = validator().validate(&Ledger::load(&store).unwrap()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FindingKind::SchemaViolation);
        assert!(report.errors[0].message.contains("header is malformed"));
    }
}
