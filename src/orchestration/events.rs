//! Events emitted while a plan runs.
//!
//! Events travel over an explicit channel owned by the plan coordinator,
//! so dashboards and test harnesses receive them in emission order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::task::{TaskId, TaskStatus};
use crate::core::wave::WaveStatus;
use crate::orchestration::coordinator::PlanState;
use crate::orchestration::report::TaskError;
use crate::wlog_trace;

/// Lifecycle events for waves, tasks, checkpoints and the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PlanEvent {
    PlanStarted {
        plan_id: String,
        waves: usize,
        tasks: usize,
        timestamp: DateTime<Utc>,
    },
    WaveStarted {
        wave: u32,
        tasks: Vec<TaskId>,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        task_id: TaskId,
        wave: u32,
        agent: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// First attempt timed out; the single retry is starting.
    TaskRetrying {
        task_id: TaskId,
        wave: u32,
        error: TaskError,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        wave: u32,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    TaskConflictDetected {
        task_id: TaskId,
        wave: u32,
        conflicting_with: Vec<TaskId>,
        resources: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    WaveCompleted {
        wave: u32,
        status: WaveStatus,
        timestamp: DateTime<Utc>,
    },
    CheckpointFailed {
        checkpoint: String,
        wave: u32,
        blocking: bool,
        failed_gates: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    PlanCompleted {
        plan_id: String,
        state: PlanState,
        timestamp: DateTime<Utc>,
    },
}

impl PlanEvent {
    /// Snake-case event name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            PlanEvent::PlanStarted { .. } => "plan_started",
            PlanEvent::WaveStarted { .. } => "wave_started",
            PlanEvent::TaskStarted { .. } => "task_started",
            PlanEvent::TaskRetrying { .. } => "task_retrying",
            PlanEvent::TaskCompleted { .. } => "task_completed",
            PlanEvent::TaskConflictDetected { .. } => "task_conflict_detected",
            PlanEvent::WaveCompleted { .. } => "wave_completed",
            PlanEvent::CheckpointFailed { .. } => "checkpoint_failed",
            PlanEvent::PlanCompleted { .. } => "plan_completed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PlanEvent::PlanStarted { timestamp, .. }
            | PlanEvent::WaveStarted { timestamp, .. }
            | PlanEvent::TaskStarted { timestamp, .. }
            | PlanEvent::TaskRetrying { timestamp, .. }
            | PlanEvent::TaskCompleted { timestamp, .. }
            | PlanEvent::TaskConflictDetected { timestamp, .. }
            | PlanEvent::WaveCompleted { timestamp, .. }
            | PlanEvent::CheckpointFailed { timestamp, .. }
            | PlanEvent::PlanCompleted { timestamp, .. } => *timestamp,
        }
    }
}

/// Outbound side of the event channel.
///
/// Cloning shares the same channel. Sending never blocks; events are
/// dropped silently once the receiver is gone.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl EventSink {
    /// Create a sink together with the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink with no observer.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PlanEvent) {
        wlog_trace!("event {}", event.name());
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
