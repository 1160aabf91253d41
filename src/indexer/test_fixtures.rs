//! Signed record builders shared by the indexer unit tests.

use crate::crypto::{encode_public_key, sign_record};
use crate::models::{
    ActorRecord, ChangelogRecord, CycleRecord, ExecutionRecord, FeedbackRecord, FeedbackType,
    Payload, SignedRecord, TaskRecord, TaskStatus, parse_id_timestamp,
};
use ed25519_dalek::SigningKey;
use serde::Serialize;

/// Reference time for every fixture.
pub const NOW: i64 = 1_700_000_000;

pub const ALICE: &str = "human:alice";
pub const BOB: &str = "agent:bob";

pub fn alice_key() -> SigningKey {
    SigningKey::from_bytes(&[1u8; 32])
}

pub fn bob_key() -> SigningKey {
    SigningKey::from_bytes(&[2u8; 32])
}

pub fn task_id(ts: i64, slug: &str) -> String {
    format!("{}-task-{}", ts, slug)
}

pub fn cycle_id(ts: i64, slug: &str) -> String {
    format!("{}-cycle-{}", ts, slug)
}

pub fn feedback_id(ts: i64, slug: &str) -> String {
    format!("{}-feedback-{}", ts, slug)
}

pub fn execution_id(ts: i64, slug: &str) -> String {
    format!("{}-exec-{}", ts, slug)
}

pub fn changelog_id(ts: i64, slug: &str) -> String {
    format!("{}-changelog-{}", ts, slug)
}

/// Sign a payload as Alice, at its id timestamp when it has one.
pub fn signed<P: Payload + Serialize>(payload: P) -> SignedRecord<P> {
    let ts = parse_id_timestamp(payload.id()).unwrap_or(NOW);
    sign_record(payload, &alice_key(), ALICE, "author", ts).unwrap()
}

/// A task titled `t-{slug}`, created at `ts`.
pub fn task_at(ts: i64, slug: &str, status: TaskStatus) -> SignedRecord<TaskRecord> {
    let mut task = TaskRecord::new(task_id(ts, slug), format!("t-{}", slug));
    task.status = status;
    signed(task)
}

pub fn cycle_at(ts: i64, slug: &str, task_ids: &[&str]) -> SignedRecord<CycleRecord> {
    let mut cycle = CycleRecord::new(cycle_id(ts, slug), format!("c-{}", slug));
    cycle.task_ids = task_ids.iter().map(|s| s.to_string()).collect();
    signed(cycle)
}

pub fn feedback_at(
    ts: i64,
    slug: &str,
    entity_id: &str,
    feedback_type: FeedbackType,
) -> SignedRecord<FeedbackRecord> {
    let mut feedback = FeedbackRecord::new(feedback_id(ts, slug), entity_id, feedback_type);
    feedback.content = format!("feedback {}", slug);
    signed(feedback)
}

pub fn execution_at(ts: i64, slug: &str, task_id: &str) -> SignedRecord<ExecutionRecord> {
    signed(ExecutionRecord::new(
        execution_id(ts, slug),
        task_id,
        format!("e-{}", slug),
    ))
}

pub fn changelog_at(ts: i64, slug: &str, related: &[&str]) -> SignedRecord<ChangelogRecord> {
    let mut changelog = ChangelogRecord::new(changelog_id(ts, slug), format!("r-{}", slug));
    changelog.related_tasks = related.iter().map(|s| s.to_string()).collect();
    changelog.completed_at = ts;
    signed(changelog)
}

/// Alice's actor record, self-signed a day before [`NOW`].
pub fn alice_actor() -> SignedRecord<ActorRecord> {
    let key = alice_key();
    let actor = ActorRecord::new(ALICE, "Alice", encode_public_key(&key.verifying_key()));
    sign_record(actor, &key, ALICE, "admin", NOW - 86_400).unwrap()
}

pub fn bob_actor() -> SignedRecord<ActorRecord> {
    let key = bob_key();
    let mut actor = ActorRecord::new(BOB, "Bob", encode_public_key(&key.verifying_key()));
    actor.actor_type = crate::models::ActorType::Agent;
    sign_record(actor, &key, BOB, "agent", NOW - 86_400).unwrap()
}
