//! Task data model for wave planning.
//!
//! Tasks are the atomic units of work handed to agents. The upstream
//! planner creates them; the plan coordinator owns them while a plan runs.

use serde::{Deserialize, Serialize};

/// Identifier of a task, unique within a plan.
///
/// Ids come from the upstream planner, so they are free-form strings
/// rather than generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its wave (or for a conflicting task) to run.
    #[default]
    Pending,
    /// Submitted to its agent.
    Running,
    /// Agent reported success.
    Completed,
    /// Agent reported failure, or both attempts timed out.
    Failed,
    /// Never ran: cancelled, blocked by a checkpoint, or a dependency failed.
    Skipped,
}

impl TaskStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// How much a task's failure matters to its wave.
///
/// A failing `Critical` task cancels the rest of a fail-fast wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Critical,
}

/// A single unit of work.
///
/// Field names follow the planner's ingestion record, so a task list
/// exported by the planner deserializes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier within the plan.
    pub id: TaskId,
    /// Identifier of the agent that performs the work.
    pub agent: String,
    /// Resources (usually file paths) the task reads or writes.
    #[serde(default)]
    pub resource_footprint: Vec<String>,
    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Higher values are scheduled first.
    #[serde(default)]
    pub priority: i32,
    /// Planner's estimate, used for the sequential baseline.
    #[serde(default)]
    pub estimated_duration_minutes: f64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// Create a pending task for the given agent with no footprint or dependencies.
    pub fn new(id: impl Into<TaskId>, agent: &str) -> Self {
        Self {
            id: id.into(),
            agent: agent.to_string(),
            resource_footprint: Vec::new(),
            depends_on: Vec::new(),
            priority: 0,
            estimated_duration_minutes: 0.0,
            severity: Severity::Normal,
            description: None,
            status: TaskStatus::Pending,
        }
    }

    pub fn with_footprint<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_footprint = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, minutes: f64) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn critical(mut self) -> Self {
        self.severity = Severity::Critical;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }

    pub fn skip(&mut self) {
        self.status = TaskStatus::Skipped;
    }

    /// Check if the task can still be dispatched.
    pub fn can_start(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}
