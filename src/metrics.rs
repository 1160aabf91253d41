//! Aggregate ledger statistics.
//!
//! The indexer treats metrics as opaque JSON: it calls the three
//! [`MetricsProvider`] methods and merges their results into the snapshot.
//! [`LedgerMetrics`] is the built-in provider.

use crate::Result;
use crate::ledger::Ledger;
use crate::models::{
    ActorStatus, ActorType, CycleStatus, FeedbackType, TaskStatus, parse_id_timestamp,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

const SECONDS_PER_DAY: i64 = 86_400;

/// Window for "recent" figures.
const RECENT_WINDOW_DAYS: i64 = 7;

/// Computes aggregate statistics over a loaded ledger.
pub trait MetricsProvider: Send + Sync {
    /// Task and cycle counts plus a health summary.
    fn system_status(&self, ledger: &Ledger) -> Result<serde_json::Value>;

    /// Throughput, lead time, cycle time and recent completions.
    fn productivity(&self, ledger: &Ledger) -> Result<serde_json::Value>;

    /// Agent counts and ratios.
    fn collaboration(&self, ledger: &Ledger) -> Result<serde_json::Value>;
}

/// Default metrics computed directly from ledger records.
#[derive(Debug, Clone, Copy)]
pub struct LedgerMetrics {
    /// Fixed reference time in unix seconds; the wall clock when `None`
    fixed_now: Option<i64>,
}

impl LedgerMetrics {
    /// Metrics relative to the time of each call.
    pub fn new() -> Self {
        Self { fixed_now: None }
    }

    /// Metrics relative to a fixed reference time.
    pub fn at(now: i64) -> Self {
        Self {
            fixed_now: Some(now),
        }
    }

    /// Reference time for one call, in unix seconds.
    fn now(&self) -> i64 {
        self.fixed_now
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemStatus {
    tasks: TaskCounts,
    cycles: CycleCounts,
    health: HealthSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskCounts {
    total: usize,
    by_status: BTreeMap<String, usize>,
    by_priority: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CycleCounts {
    total: usize,
    active: usize,
    completed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSummary {
    /// 0-100
    overall_score: u8,
    blocked_tasks: usize,
    stale_tasks: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Productivity {
    /// Tasks completed in the recent window
    throughput: usize,
    /// Average days from creation to first release, for released tasks
    lead_time: f64,
    /// Average days from creation to last signature, for done tasks
    cycle_time: f64,
    tasks_completed_7d: usize,
    average_completion_time: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Collaboration {
    active_agents: usize,
    total_agents: usize,
    agent_utilization: f64,
    human_agent_ratio: f64,
    collaboration_index: f64,
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl LedgerMetrics {
    /// Done tasks with (created, finished) in unix seconds.
    fn completions(&self, ledger: &Ledger) -> Vec<(i64, i64)> {
        ledger
            .tasks
            .iter()
            .filter(|t| t.payload.status == TaskStatus::Done)
            .filter_map(|t| {
                let created = parse_id_timestamp(&t.payload.id).ok()?;
                let finished = t.header.last_signature().map(|s| s.timestamp)?;
                Some((created, finished.max(created)))
            })
            .collect()
    }
}

impl MetricsProvider for LedgerMetrics {
    fn system_status(&self, ledger: &Ledger) -> Result<serde_json::Value> {
        let mut by_status = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        for task in &ledger.tasks {
            *by_status
                .entry(task.payload.status.as_str().to_string())
                .or_insert(0) += 1;
            *by_priority
                .entry(task.payload.priority.as_str().to_string())
                .or_insert(0) += 1;
        }

        let blocking_targets: HashSet<&str> = ledger
            .feedback
            .iter()
            .filter(|f| f.payload.is_open(FeedbackType::Blocking))
            .map(|f| f.payload.entity_id.as_str())
            .collect();
        let open_tasks: Vec<_> = ledger
            .tasks
            .iter()
            .filter(|t| !t.payload.status.is_terminal())
            .collect();
        let blocked_tasks = open_tasks
            .iter()
            .filter(|t| blocking_targets.contains(t.payload.id.as_str()))
            .count();
        let stale_cutoff = self.now() - RECENT_WINDOW_DAYS * SECONDS_PER_DAY;
        let stale_tasks = open_tasks
            .iter()
            .filter(|t| {
                let touched = t
                    .header
                    .last_signature()
                    .map(|s| s.timestamp)
                    .or_else(|| parse_id_timestamp(&t.payload.id).ok());
                touched.is_some_and(|ts| ts < stale_cutoff)
            })
            .count();

        let overall_score = if open_tasks.is_empty() {
            100
        } else {
            let troubled = (blocked_tasks + stale_tasks).min(open_tasks.len());
            (100 - troubled * 100 / open_tasks.len()) as u8
        };

        let status = SystemStatus {
            tasks: TaskCounts {
                total: ledger.tasks.len(),
                by_status,
                by_priority,
            },
            cycles: CycleCounts {
                total: ledger.cycles.len(),
                active: ledger
                    .cycles
                    .iter()
                    .filter(|c| c.payload.status == CycleStatus::Active)
                    .count(),
                completed: ledger
                    .cycles
                    .iter()
                    .filter(|c| c.payload.status == CycleStatus::Completed)
                    .count(),
            },
            health: HealthSummary {
                overall_score,
                blocked_tasks,
                stale_tasks,
            },
        };
        to_value(&status)
    }

    fn productivity(&self, ledger: &Ledger) -> Result<serde_json::Value> {
        let completions = self.completions(ledger);
        let window_start = self.now() - RECENT_WINDOW_DAYS * SECONDS_PER_DAY;
        let recent = completions
            .iter()
            .filter(|(_, finished)| *finished >= window_start)
            .count();

        let cycle_days: Vec<f64> = completions
            .iter()
            .map(|(created, finished)| (finished - created) as f64 / SECONDS_PER_DAY as f64)
            .collect();

        let lead_days: Vec<f64> = ledger
            .tasks
            .iter()
            .filter_map(|t| {
                let created = parse_id_timestamp(&t.payload.id).ok()?;
                let released = ledger
                    .changelogs
                    .iter()
                    .filter(|c| c.payload.related_tasks.contains(&t.payload.id))
                    .map(|c| c.payload.completed_at)
                    .min()?;
                Some((released - created).max(0) as f64 / SECONDS_PER_DAY as f64)
            })
            .collect();

        let productivity = Productivity {
            throughput: recent,
            lead_time: round2(average(&lead_days)),
            cycle_time: round2(average(&cycle_days)),
            tasks_completed_7d: recent,
            average_completion_time: round2(average(&cycle_days)),
        };
        to_value(&productivity)
    }

    fn collaboration(&self, ledger: &Ledger) -> Result<serde_json::Value> {
        let agents: Vec<_> = ledger
            .actors
            .iter()
            .filter(|a| a.payload.actor_type == ActorType::Agent)
            .collect();
        let humans = ledger.actors.len() - agents.len();

        let window_start = self.now() - RECENT_WINDOW_DAYS * SECONDS_PER_DAY;
        let recent_signers: HashSet<&str> = ledger
            .executions
            .iter()
            .flat_map(|e| e.header.signatures.iter())
            .filter(|s| s.timestamp >= window_start)
            .map(|s| s.key_id.as_str())
            .collect();
        let active_agents = agents
            .iter()
            .filter(|a| a.payload.status == ActorStatus::Active)
            .filter(|a| recent_signers.contains(a.payload.id.as_str()))
            .count();

        let agent_utilization = if agents.is_empty() {
            0.0
        } else {
            active_agents as f64 * 100.0 / agents.len() as f64
        };
        let human_agent_ratio = if agents.is_empty() {
            humans as f64
        } else {
            humans as f64 / agents.len() as f64
        };
        let collaboration_index = if ledger.actors.is_empty() {
            0.0
        } else {
            recent_signers.len().min(ledger.actors.len()) as f64 * 100.0
                / ledger.actors.len() as f64
        };

        let collaboration = Collaboration {
            active_agents,
            total_agents: agents.len(),
            agent_utilization: round2(agent_utilization),
            human_agent_ratio: round2(human_agent_ratio),
            collaboration_index: round2(collaboration_index),
        };
        to_value(&collaboration)
    }
}
