use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskId> },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Task {task} is assigned to unknown agent {agent}")]
    UnknownAgent { task: TaskId, agent: String },

    #[error("Conflict could not be resolved for task {task}: {reason}")]
    ConflictUnresolved { task: TaskId, reason: String },

    #[error("Checkpoint {checkpoint} blocked the plan after wave {wave} (failed gates: {})", .gates.join(", "))]
    CheckpointBlockingFailure {
        checkpoint: String,
        wave: u32,
        gates: Vec<String>,
    },

    #[error("Plan failed at wave {wave}: {reason}")]
    PlanFailed { wave: u32, reason: String },
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
