//! Per-task enrichment: relationships, metrics, release status and health.
//!
//! Enrichment reads the shared [`LedgerLookup`] and the precomputed
//! derived-state sets. It never recomputes a derived state itself.

use crate::ledger::LedgerLookup;
use crate::models::index::{
    Assignment, CycleRef, DerivedStateLookup, EnrichedTask, LastActivityType, ReleaseInfo,
    SignerInfo, TaskDerivedState, TaskMetrics, TaskRelationships,
};
use crate::models::{
    FeedbackType, RecordHeader, SignedRecord, TASK_REFERENCE_PREFIX, TYPED_REFERENCE_PREFIXES,
    TaskRecord, TaskStatus, parse_id_timestamp,
};
use crate::{Error, Result};
use std::collections::HashSet;

/// Signature edits closer than this to creation are treated as noise.
pub const MODIFICATION_NOISE_SECS: i64 = 60;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Unix seconds to epoch milliseconds, saturating at the `i64` bounds.
fn secs_to_millis(secs: i64) -> i64 {
    secs.saturating_mul(MILLIS_PER_SECOND)
}

/// When a task was last touched, and by what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastUpdated {
    /// Epoch milliseconds
    pub last_updated: i64,
    pub activity_type: LastActivityType,
    pub recent_activity: String,
}

/// Who signed a record, taken from its signature trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorship {
    /// The record carries no signatures yet.
    Unsigned,
    Signed {
        author: SignerInfo,
        last_modifier: SignerInfo,
    },
}

impl Authorship {
    pub fn of(header: &RecordHeader) -> Self {
        match (header.first_signature(), header.last_signature()) {
            (Some(first), Some(last)) => Self::Signed {
                author: signer_info(first),
                last_modifier: signer_info(last),
            },
            _ => Self::Unsigned,
        }
    }
}

fn signer_info(sig: &crate::models::Signature) -> SignerInfo {
    SignerInfo {
        actor_id: sig.key_id.clone(),
        role: sig.role.clone(),
        timestamp: sig.timestamp,
    }
}

/// Shared, read-only inputs for enriching every task of one pass.
#[derive(Debug)]
pub struct EnrichmentContext<'a> {
    pub lookup: &'a LedgerLookup<'a>,
    pub derived: &'a DerivedStateLookup<'a>,
    /// Reference time in unix seconds
    pub now: i64,
}

/// Creation time of a task in unix seconds.
///
/// Falls back to the first signature, then to zero, when the id carries no
/// timestamp.
pub fn task_created_secs(task: &SignedRecord<TaskRecord>) -> i64 {
    parse_id_timestamp(&task.payload.id)
        .ok()
        .or_else(|| task.header.first_signature().map(|s| s.timestamp))
        .unwrap_or(0)
}

/// Determine when a task was last touched.
///
/// Starts at creation. The last signature only counts when it lands more
/// than [`MODIFICATION_NOISE_SECS`] after creation. The newest related
/// feedback, execution and changelog move the result whenever strictly newer.
pub fn calculate_last_updated(
    task: &SignedRecord<TaskRecord>,
    lookup: &LedgerLookup<'_>,
) -> LastUpdated {
    let created = task_created_secs(task);
    let mut latest = LastUpdated {
        last_updated: secs_to_millis(created),
        activity_type: LastActivityType::TaskCreated,
        recent_activity: "Task created".to_string(),
    };

    if let Some(sig) = task.header.last_signature() {
        if sig.timestamp.saturating_sub(created) > MODIFICATION_NOISE_SECS {
            latest = LastUpdated {
                last_updated: secs_to_millis(sig.timestamp),
                activity_type: LastActivityType::TaskModified,
                recent_activity: format!("Task modified (status: {})", task.payload.status),
            };
        }
    }

    let id = task.payload.id.as_str();

    let newest_feedback = lookup
        .feedback_for(id)
        .iter()
        .filter_map(|f| parse_id_timestamp(&f.payload.id).ok().map(|ts| (ts, *f)))
        .max_by_key(|(ts, _)| *ts);
    if let Some((ts, feedback)) = newest_feedback {
        bump(
            &mut latest,
            ts,
            LastActivityType::FeedbackReceived,
            || format!("{} feedback received", feedback.payload.feedback_type.as_str()),
        );
    }

    let newest_execution = lookup
        .executions_for(id)
        .iter()
        .filter_map(|e| parse_id_timestamp(&e.payload.id).ok().map(|ts| (ts, *e)))
        .max_by_key(|(ts, _)| *ts);
    if let Some((ts, execution)) = newest_execution {
        bump(&mut latest, ts, LastActivityType::ExecutionAdded, || {
            format!("Execution added: {}", execution.payload.title)
        });
    }

    let newest_changelog = lookup
        .changelogs_for(id)
        .iter()
        .filter_map(|c| parse_id_timestamp(&c.payload.id).ok().map(|ts| (ts, *c)))
        .max_by_key(|(ts, _)| *ts);
    if let Some((ts, changelog)) = newest_changelog {
        bump(&mut latest, ts, LastActivityType::ChangelogCreated, || {
            format!("Included in changelog: {}", changelog.payload.title)
        });
    }

    latest
}

fn bump(
    latest: &mut LastUpdated,
    ts_secs: i64,
    activity_type: LastActivityType,
    describe: impl FnOnce() -> String,
) {
    let ts = secs_to_millis(ts_secs);
    if ts > latest.last_updated {
        *latest = LastUpdated {
            last_updated: ts,
            activity_type,
            recent_activity: describe(),
        };
    }
}

/// Health score penalty for a task's status.
fn status_penalty(status: TaskStatus) -> u32 {
    match status {
        TaskStatus::Done => 0,
        TaskStatus::Active => 5,
        TaskStatus::Ready => 10,
        TaskStatus::Review => 15,
        TaskStatus::Paused => 25,
        TaskStatus::Draft | TaskStatus::Archived | TaskStatus::Discarded => 30,
    }
}

/// Compute a 0-100 health score.
///
/// Starts at 100 and subtracts penalties for status (up to 30), open
/// blocking feedback (10 each, up to 30), missing executions (20 when
/// active with none, else 10 when fewer than two) and staleness (up to 20).
pub fn calculate_health_score(
    status: TaskStatus,
    open_blocking: usize,
    execution_count: usize,
    days_since_update: u64,
) -> u8 {
    let mut penalty = status_penalty(status);

    penalty += (open_blocking.min(3) as u32) * 10;

    if status == TaskStatus::Active && execution_count == 0 {
        penalty += 20;
    } else if execution_count < 2 {
        penalty += 10;
    }

    penalty += match days_since_update {
        d if d > 30 => 20,
        d if d > 14 => 15,
        d if d > 7 => 10,
        _ => 0,
    };

    100u32.saturating_sub(penalty).min(100) as u8
}

/// Produce the enriched view of one task.
pub fn enrich_task_record(
    task: &SignedRecord<TaskRecord>,
    ctx: &EnrichmentContext<'_>,
) -> EnrichedTask {
    let lookup = ctx.lookup;
    let payload = &task.payload;
    let id = payload.id.as_str();

    // 1. Last activity
    let last = calculate_last_updated(task, lookup);

    // 2. Signature trail
    let (created_by, last_modified_by) = match Authorship::of(&task.header) {
        Authorship::Unsigned => (None, None),
        Authorship::Signed {
            author,
            last_modifier,
        } => (Some(author), Some(last_modifier)),
    };

    let feedback = lookup.feedback_for(id);

    // 3. Open assignments
    let assigned_to = feedback
        .iter()
        .filter(|f| f.payload.is_open(FeedbackType::Assignment))
        .filter_map(|f| {
            let actor_id = f.payload.assignee.clone()?;
            let assigned_at = parse_id_timestamp(&f.payload.id)
                .ok()
                .or_else(|| f.header.first_signature().map(|s| s.timestamp))
                .unwrap_or(0);
            Some(Assignment {
                actor_id,
                assigned_at,
            })
        })
        .collect();

    // 4. Typed references, minus finished task dependencies
    let depends_on = payload
        .references
        .iter()
        .filter(|r| TYPED_REFERENCE_PREFIXES.iter().any(|p| r.starts_with(p)))
        .filter(|r| match r.strip_prefix(TASK_REFERENCE_PREFIX) {
            Some(target) => !lookup
                .tasks_by_id
                .get(target)
                .is_some_and(|t| t.payload.status.is_terminal()),
            None => true,
        })
        .cloned()
        .collect();

    // 5. Open tasks pointing back at this one
    let blocked_by = lookup
        .open_referrers
        .get(id)
        .map(|ids| ids.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    // 6. Cycles, from both sides of the link
    let mut seen = HashSet::new();
    let cycles = payload
        .cycle_ids
        .iter()
        .filter_map(|cycle_id| lookup.cycles_by_id.get(cycle_id.as_str()).copied())
        .chain(lookup.cycles_by_task.get(id).into_iter().flatten().copied())
        .filter(|cycle| seen.insert(cycle.payload.id.as_str()))
        .map(|cycle| CycleRef {
            id: cycle.payload.id.clone(),
            title: cycle.payload.title.clone(),
        })
        .collect();

    // 7. Counts
    let execution_count = lookup.executions_for(id).len();
    let blocking_feedback_count = feedback
        .iter()
        .filter(|f| f.payload.is_open(FeedbackType::Blocking))
        .count();
    let open_question_count = feedback
        .iter()
        .filter(|f| f.payload.is_open(FeedbackType::Question))
        .count();

    // 8. Resolution time
    let created_ms = secs_to_millis(task_created_secs(task));
    let time_to_resolution = (payload.status == TaskStatus::Done).then(|| {
        let elapsed_ms = last.last_updated.saturating_sub(created_ms).max(0);
        let hours = elapsed_ms as f64 / MILLIS_PER_HOUR as f64;
        (hours * 100.0).round() / 100.0
    });

    // 9. Release
    let release = match lookup
        .changelogs_for(id)
        .iter()
        .max_by(|a, b| {
            (a.payload.completed_at, &a.payload.id).cmp(&(b.payload.completed_at, &b.payload.id))
        })
    {
        Some(latest) => ReleaseInfo {
            is_released: true,
            last_release_version: latest.payload.version.clone(),
        },
        None => ReleaseInfo::default(),
    };

    // 10-11. Derived flags and health
    let days_since_update =
        (secs_to_millis(ctx.now)
            .saturating_sub(last.last_updated)
            .max(0)
            / MILLIS_PER_DAY) as u64;
    let health_score = calculate_health_score(
        payload.status,
        blocking_feedback_count,
        execution_count,
        days_since_update,
    );

    EnrichedTask {
        task: payload.clone(),
        derived_state: TaskDerivedState {
            is_stalled: ctx.derived.stalled.contains(id),
            is_at_risk: ctx.derived.at_risk.contains(id),
            needs_clarification: ctx.derived.needs_clarification.contains(id),
            is_blocked_by_dependency: ctx.derived.blocked_by_dependency.contains(id),
            health_score,
            time_in_current_stage: days_since_update,
        },
        relationships: TaskRelationships {
            created_by,
            last_modified_by,
            assigned_to,
            depends_on,
            blocked_by,
            cycles,
        },
        metrics: TaskMetrics {
            execution_count,
            blocking_feedback_count,
            open_question_count,
            time_to_resolution,
        },
        release,
        last_updated: last.last_updated,
        last_activity_type: last.activity_type,
        recent_activity: last.recent_activity,
    }
}

/// Enrich every task of the ledger, preserving ledger order.
///
/// With `parallel`, tasks are split into one chunk per available core and
/// enriched on scoped threads.
pub fn enrich_all(ctx: &EnrichmentContext<'_>, parallel: bool) -> Result<Vec<EnrichedTask>> {
    let tasks = &ctx.lookup.ledger.tasks;
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    if !parallel || workers <= 1 || tasks.len() < 2 {
        return Ok(tasks.iter().map(|t| enrich_task_record(t, ctx)).collect());
    }

    let chunk_size = tasks.len().div_ceil(workers);
    std::thread::scope(|s| {
        let handles: Vec<_> = tasks
            .chunks(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|t| enrich_task_record(t, ctx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut enriched = Vec::with_capacity(tasks.len());
        for handle in handles {
            let chunk = handle
                .join()
                .map_err(|_| Error::Other("enrichment thread panicked".to_string()))?;
            enriched.extend(chunk);
        }
        Ok(enriched)
    })
}
