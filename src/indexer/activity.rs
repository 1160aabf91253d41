//! Activity stream built from record creation times.

use crate::ledger::Ledger;
use crate::models::index::{ActivityEvent, ActivityType};
use crate::models::{Payload, SignedRecord, created_at_secs};
use std::collections::BTreeMap;

/// Maximum number of events kept in the activity stream.
pub const MAX_ACTIVITY_EVENTS: usize = 15;

/// Build the most recent activity events, newest first.
///
/// Records without a usable creation timestamp are skipped. Never fails.
pub fn calculate_activity_history(ledger: &Ledger) -> Vec<ActivityEvent> {
    let mut events = Vec::new();

    for task in &ledger.tasks {
        let mut metadata = BTreeMap::new();
        metadata.insert("status".to_string(), task.payload.status.as_str().to_string());
        metadata.insert(
            "priority".to_string(),
            task.payload.priority.as_str().to_string(),
        );
        push_event(&mut events, task, ActivityType::TaskCreated, metadata);
    }

    for cycle in &ledger.cycles {
        let mut metadata = BTreeMap::new();
        metadata.insert("taskCount".to_string(), cycle.payload.task_ids.len().to_string());
        push_event(&mut events, cycle, ActivityType::CycleCreated, metadata);
    }

    for feedback in &ledger.feedback {
        let payload = &feedback.payload;
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "feedbackType".to_string(),
            payload.feedback_type.as_str().to_string(),
        );
        metadata.insert("status".to_string(), payload.status.as_str().to_string());
        metadata.insert("entityId".to_string(), payload.entity_id.clone());
        if let Some(assignee) = &payload.assignee {
            metadata.insert("assignee".to_string(), assignee.clone());
        }
        if let Some(resolved) = &payload.resolves_feedback_id {
            metadata.insert("resolvesFeedbackId".to_string(), resolved.clone());
        }
        push_event(&mut events, feedback, ActivityType::FeedbackCreated, metadata);
    }

    for execution in &ledger.executions {
        let mut metadata = BTreeMap::new();
        metadata.insert("taskId".to_string(), execution.payload.task_id.clone());
        metadata.insert(
            "executionType".to_string(),
            execution.payload.execution_type.clone(),
        );
        push_event(&mut events, execution, ActivityType::ExecutionCreated, metadata);
    }

    for changelog in &ledger.changelogs {
        let mut metadata = BTreeMap::new();
        if let Some(version) = &changelog.payload.version {
            metadata.insert("version".to_string(), version.clone());
        }
        push_event(&mut events, changelog, ActivityType::ChangelogCreated, metadata);
    }

    for actor in &ledger.actors {
        push_event(&mut events, actor, ActivityType::ActorCreated, BTreeMap::new());
    }

    events.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    events.truncate(MAX_ACTIVITY_EVENTS);
    events
}

fn push_event<P: Payload>(
    events: &mut Vec<ActivityEvent>,
    record: &SignedRecord<P>,
    event_type: ActivityType,
    metadata: BTreeMap<String, String>,
) {
    let Some(timestamp) = created_at_secs(record) else {
        return;
    };
    let title = match event_type {
        ActivityType::FeedbackCreated => feedback_title(record.payload.title()),
        _ => record.payload.title().to_string(),
    };
    events.push(ActivityEvent {
        timestamp,
        event_type,
        entity_id: record.payload.id().to_string(),
        entity_title: title,
        actor_id: record.header.first_signature().map(|s| s.key_id.clone()),
        metadata,
    });
}

/// Feedback has no title; use the start of its content.
fn feedback_title(content: &str) -> String {
    const MAX_CHARS: usize = 60;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{}...", head)
    }
}
