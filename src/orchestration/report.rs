//! Execution results for tasks, waves and whole plans.
//!
//! These structures are the plan report: serializable with stable
//! camelCase field names and no other wire-format guarantees.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::core::wave::WaveStatus;
use crate::error::{Error, Result};
use crate::orchestration::conflict::ConflictDetection;
use crate::orchestration::coordinator::PlanState;
use crate::orchestration::validator::CheckpointResult;

/// Task-scoped failure. Recorded in the task's result; never aborts the plan.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskError {
    #[error("agent reported failure: {message}")]
    Agent { message: String },

    #[error("submission failed: {message}")]
    Submission { message: String },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("dependency {dependency} did not complete")]
    DependencyNotCompleted { dependency: TaskId },

    #[error("cancelled after critical task {trigger} failed")]
    FailFast { trigger: TaskId },

    #[error("plan stopped at wave {wave}")]
    Blocked { wave: u32 },
}

impl TaskError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionResult {
    pub task_id: TaskId,
    pub wave: u32,
    pub agent: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<TaskError>,
    /// Timeout retries consumed (at most one).
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Host task this one was merged behind, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<TaskId>,
    /// Dispatched but abandoned by a hard abort; any late result was discarded.
    pub cancelled: bool,
}

impl TaskExecutionResult {
    /// A not-yet-run result for a task.
    pub fn pending(task: &Task, wave: u32) -> Self {
        Self {
            task_id: task.id.clone(),
            wave,
            agent: task.agent.clone(),
            status: TaskStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            retry_count: 0,
            output: None,
            merged_into: None,
            cancelled: false,
        }
    }

    /// A result for a task that never ran.
    pub fn skipped(task: &Task, wave: u32, error: TaskError) -> Self {
        Self {
            status: TaskStatus::Skipped,
            error: Some(error),
            ..Self::pending(task, wave)
        }
    }

    /// Wall-clock duration between start and end, when both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

/// Outcome of one wave, including its checkpoint if one ran.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveExecutionResult {
    pub wave: u32,
    pub status: WaveStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Longest single-task estimate in the wave.
    pub estimated_minutes: f64,
    pub tasks: BTreeMap<TaskId, TaskExecutionResult>,
    pub conflicts: Vec<ConflictDetection>,
    pub checkpoint: Option<CheckpointResult>,
}

impl WaveExecutionResult {
    pub fn new(wave: u32, estimated_minutes: f64) -> Self {
        Self {
            wave,
            status: WaveStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: 0,
            estimated_minutes,
            tasks: BTreeMap::new(),
            conflicts: Vec::new(),
            checkpoint: None,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|r| r.status == status).count()
    }

    pub fn failed_tasks(&self) -> Vec<&TaskId> {
        self.tasks
            .values()
            .filter(|r| r.status == TaskStatus::Failed)
            .map(|r| &r.task_id)
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.count(TaskStatus::Failed) > 0
    }
}

/// A gate that failed at some checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedGate {
    pub checkpoint: String,
    pub wave: u32,
    pub gate: String,
    pub message: String,
    pub blocking: bool,
}

/// Parallel speed-up accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimingMetrics {
    /// Sum over waves of the longest task estimate in each wave.
    pub sequential_estimate_minutes: f64,
    /// Observed wall-clock time from first wave start to last wave end.
    pub actual_parallel_minutes: f64,
    pub time_savings_minutes: f64,
    /// Savings as a percentage of the estimate, never negative.
    pub percentage_faster: f64,
}

impl TimingMetrics {
    pub fn compute(sequential_estimate_minutes: f64, actual: Duration) -> Self {
        let actual_parallel_minutes = actual.as_secs_f64() / 60.0;
        let time_savings_minutes = sequential_estimate_minutes - actual_parallel_minutes;
        let percentage_faster = if sequential_estimate_minutes > 0.0 {
            (time_savings_minutes / sequential_estimate_minutes * 100.0).max(0.0)
        } else {
            0.0
        };
        Self {
            sequential_estimate_minutes,
            actual_parallel_minutes,
            time_savings_minutes,
            percentage_faster,
        }
    }
}

/// The final plan report.
///
/// Lists every task's terminal status, the wave the plan stopped at (if it
/// did not complete), and every failing checkpoint gate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecutionResult {
    pub plan_id: String,
    pub state: PlanState,
    /// Completed, but with task failures or failed non-blocking gates.
    pub degraded: bool,
    pub stopped_at_wave: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub waves: Vec<WaveExecutionResult>,
    pub tasks: BTreeMap<TaskId, TaskExecutionResult>,
    pub failed_gates: Vec<FailedGate>,
    pub metrics: TimingMetrics,
}

impl PlanExecutionResult {
    pub fn task(&self, id: &TaskId) -> Option<&TaskExecutionResult> {
        self.tasks.get(id)
    }

    pub fn task_status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(&TaskId::from(id)).map(|r| r.status)
    }

    pub fn wave(&self, number: u32) -> Option<&WaveExecutionResult> {
        self.waves.iter().find(|w| w.wave == number)
    }

    /// Convert a BLOCKED or FAILED report into the matching error.
    pub fn ensure_success(&self) -> Result<()> {
        match self.state {
            PlanState::Blocked => {
                let wave = self.stopped_at_wave.unwrap_or(0);
                let blocking: Vec<&FailedGate> = self
                    .failed_gates
                    .iter()
                    .filter(|g| g.blocking && g.wave == wave)
                    .collect();
                Err(Error::CheckpointBlockingFailure {
                    checkpoint: blocking
                        .first()
                        .map(|g| g.checkpoint.clone())
                        .unwrap_or_default(),
                    wave,
                    gates: blocking.iter().map(|g| g.gate.clone()).collect(),
                })
            }
            PlanState::Failed => Err(Error::PlanFailed {
                wave: self.stopped_at_wave.unwrap_or(0),
                reason: "wave aborted before completion".to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
