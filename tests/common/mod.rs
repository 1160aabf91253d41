//! Common test utilities for keelson integration tests.
//!
//! Provides `TestEnv`, an isolated repository with a ledger directory and
//! helpers for writing signed records into it.

#![allow(dead_code)]

use assert_cmd::Command;
use ed25519_dalek::SigningKey;
use keelson::crypto::{encode_public_key, sign_record};
use keelson::ledger::write_record;
use keelson::models::{
    ActorRecord, ExecutionRecord, FeedbackRecord, FeedbackType, Payload, SignedRecord,
    TaskRecord, TaskStatus,
};
use keelson::storage::{FsRecordStore, LEDGER_DIR_NAME};
pub use tempfile::TempDir;

pub const ALICE: &str = "human:alice";

/// A test environment with an isolated repository directory.
///
/// The `kn()` method returns a `Command` running inside the repository with
/// every `KN_*` variable cleared, making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and run `kn init`.
    pub fn init() -> Self {
        let env = Self::new();
        env.kn().arg("init").assert().success();
        env
    }

    /// Get a Command for the kn binary inside the repository.
    pub fn kn(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kn"));
        cmd.current_dir(self.repo_dir.path());
        for var in ["KN_REPO", "KN_LEDGER_DIR", "KN_CACHE_KEY", "KN_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn path(&self) -> &std::path::Path {
        self.repo_dir.path()
    }

    pub fn ledger_path(&self) -> std::path::PathBuf {
        self.repo_dir.path().join(LEDGER_DIR_NAME)
    }

    pub fn store(&self) -> FsRecordStore {
        FsRecordStore::open(&self.ledger_path()).unwrap()
    }

    pub fn alice_key(&self) -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    /// Sign a payload as Alice at `ts` and write it to the ledger.
    pub fn write<P: Payload + serde::Serialize>(&self, payload: P, ts: i64) -> SignedRecord<P> {
        let record = sign_record(payload, &self.alice_key(), ALICE, "author", ts).unwrap();
        write_record(&self.store(), &record).unwrap();
        record
    }

    /// Register Alice so her signatures verify.
    pub fn add_alice(&self) {
        let key = self.alice_key();
        let actor = ActorRecord::new(ALICE, "Alice", encode_public_key(&key.verifying_key()));
        self.write(actor, 1_600_000_000);
    }

    pub fn add_task(&self, ts: i64, slug: &str, status: TaskStatus) -> String {
        let mut task = TaskRecord::new(format!("{}-task-{}", ts, slug), format!("Task {}", slug));
        task.status = status;
        self.write(task, ts).payload.id
    }

    pub fn add_feedback(&self, ts: i64, task_id: &str, feedback_type: FeedbackType) -> String {
        let mut feedback =
            FeedbackRecord::new(format!("{}-feedback-fb", ts), task_id, feedback_type);
        feedback.content = "Which database should this use?".to_string();
        self.write(feedback, ts).payload.id
    }

    pub fn add_execution(&self, ts: i64, task_id: &str) -> String {
        let execution = ExecutionRecord::new(format!("{}-exec-run", ts), task_id, "First pass");
        self.write(execution, ts).payload.id
    }

    /// Overwrite one field of a stored task payload without re-signing.
    pub fn tamper_task_title(&self, task_id: &str, title: &str) {
        let path = self
            .ledger_path()
            .join("tasks")
            .join(format!("{}.json", task_id));
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["payload"]["title"] = serde_json::json!(title);
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}
