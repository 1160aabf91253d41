//! System-wide derived task states.
//!
//! Derived states are classifications computed from the whole ledger rather
//! than stored on a record:
//! - **stalled**: active for over a week with no recent execution, or in
//!   review for over three days
//! - **at risk**: critical and paused, or carrying two or more open blocking
//!   feedback entries
//! - **needs clarification**: at least one open question
//! - **blocked by dependency**: references a task that is not done or archived
//!
//! Creation time always comes from the id-embedded timestamp.

use crate::ledger::LedgerLookup;
use crate::models::index::DerivedStateSets;
use crate::models::{
    FeedbackType, SignedRecord, TaskPriority, TaskRecord, TaskStatus, parse_id_timestamp,
};

const SECONDS_PER_DAY: i64 = 86_400;

/// Days an active task may go without executions before it is stalled.
pub const STALLED_ACTIVE_DAYS: i64 = 7;

/// Days a task may sit in review before it is stalled.
pub const STALLED_REVIEW_DAYS: i64 = 3;

/// Open blocking feedback entries that put a task at risk.
pub const AT_RISK_BLOCKING_THRESHOLD: usize = 2;

/// Classify every task. `now` is unix seconds.
pub fn calculate_derived_states(lookup: &LedgerLookup<'_>, now: i64) -> DerivedStateSets {
    let mut sets = DerivedStateSets::default();

    for task in &lookup.ledger.tasks {
        let id = task.payload.id.clone();

        if is_stalled(task, lookup, now) {
            sets.stalled_tasks.push(id.clone());
        }
        if is_at_risk(task, lookup) {
            sets.at_risk_tasks.push(id.clone());
        }
        if needs_clarification(task, lookup) {
            sets.needs_clarification_tasks.push(id.clone());
        }
        if is_blocked_by_dependency(task, lookup) {
            sets.blocked_by_dependency_tasks.push(id);
        }
    }

    sets
}

fn is_stalled(task: &SignedRecord<TaskRecord>, lookup: &LedgerLookup<'_>, now: i64) -> bool {
    let Ok(created) = parse_id_timestamp(&task.payload.id) else {
        return false;
    };
    let age = now - created;

    match task.payload.status {
        TaskStatus::Active => {
            if age <= STALLED_ACTIVE_DAYS * SECONDS_PER_DAY {
                return false;
            }
            let window_start = now - STALLED_ACTIVE_DAYS * SECONDS_PER_DAY;
            let recent_execution = lookup
                .executions_for(&task.payload.id)
                .iter()
                .filter_map(|e| parse_id_timestamp(&e.payload.id).ok())
                .any(|ts| ts > window_start);
            !recent_execution
        }
        TaskStatus::Review => age > STALLED_REVIEW_DAYS * SECONDS_PER_DAY,
        _ => false,
    }
}

fn is_at_risk(task: &SignedRecord<TaskRecord>, lookup: &LedgerLookup<'_>) -> bool {
    if task.payload.priority == TaskPriority::Critical && task.payload.status == TaskStatus::Paused
    {
        return true;
    }
    let open_blocking = lookup
        .feedback_for(&task.payload.id)
        .iter()
        .filter(|f| f.payload.is_open(FeedbackType::Blocking))
        .count();
    open_blocking >= AT_RISK_BLOCKING_THRESHOLD
}

fn needs_clarification(task: &SignedRecord<TaskRecord>, lookup: &LedgerLookup<'_>) -> bool {
    lookup
        .feedback_for(&task.payload.id)
        .iter()
        .any(|f| f.payload.is_open(FeedbackType::Question))
}

fn is_blocked_by_dependency(task: &SignedRecord<TaskRecord>, lookup: &LedgerLookup<'_>) -> bool {
    task.payload.task_references().any(|target| {
        lookup.tasks_by_id.get(target).is_some_and(|dep| {
            !matches!(dep.payload.status, TaskStatus::Done | TaskStatus::Archived)
        })
    })
}
