//! Core domain models for wave planning.
//!
//! This module contains the fundamental data structures: tasks, the
//! dependency graph that levels them, the resulting waves, and the
//! checkpoints evaluated between waves.

pub mod checkpoint;
pub mod dag;
pub mod task;
pub mod wave;

pub use checkpoint::{Checkpoint, CheckpointBinding, GateCheck, GateOutcome, QualityGate};
pub use dag::{build_waves, TaskDAG};
pub use task::{Severity, Task, TaskId, TaskStatus};
pub use wave::{Wave, WavePlan, WaveStatus};
