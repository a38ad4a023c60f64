//! Orchestration layer: conflict detection, wave execution, checkpoint
//! validation and the plan coordinator that drives them.

pub mod conflict;
pub mod coordinator;
pub mod events;
pub mod report;
pub mod runner;
pub mod validator;

pub use conflict::{detect_conflicts, ActiveRegistry, ConflictDetection, Resolution};
pub use coordinator::{CoordinatorConfig, PlanCoordinator, PlanState};
pub use events::{EventSink, PlanEvent};
pub use report::{
    FailedGate, PlanExecutionResult, TaskError, TaskExecutionResult, TimingMetrics,
    WaveExecutionResult,
};
pub use runner::{RunnerConfig, WaveRunner};
pub use validator::{CheckpointResult, CheckpointStatus, CheckpointValidator, GateResult};
