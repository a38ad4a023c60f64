//! Checkpoint definitions: named sets of quality gates evaluated between waves.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::orchestration::report::WaveExecutionResult;

/// Result of a single quality gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub message: String,
}

impl GateOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// Caller-supplied gate predicate. Receives the result of the wave just run.
pub type GateFn = Arc<dyn Fn(&WaveExecutionResult) -> BoxFuture<'static, GateOutcome> + Send + Sync>;

/// What a quality gate actually runs.
#[derive(Clone)]
pub enum GateCheck {
    /// Run an external program; exit status zero passes.
    Command { program: String, args: Vec<String> },
    /// Passes when no task in the wave failed.
    NoFailedTasks,
    /// Arbitrary async predicate supplied by the embedding application.
    Callback(GateFn),
}

impl GateCheck {
    /// Short label used in logs and serialized plans.
    pub fn kind(&self) -> &'static str {
        match self {
            GateCheck::Command { .. } => "command",
            GateCheck::NoFailedTasks => "no_failed_tasks",
            GateCheck::Callback(_) => "callback",
        }
    }
}

impl std::fmt::Debug for GateCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateCheck::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            GateCheck::NoFailedTasks => write!(f, "NoFailedTasks"),
            GateCheck::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

/// A named pass/fail check.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub name: String,
    pub check: GateCheck,
}

impl QualityGate {
    pub fn command(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            check: GateCheck::Command {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        }
    }

    pub fn no_failed_tasks(name: &str) -> Self {
        Self {
            name: name.to_string(),
            check: GateCheck::NoFailedTasks,
        }
    }

    /// Build a gate from an async closure.
    pub fn from_fn<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(&WaveExecutionResult) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = GateOutcome> + Send + 'static,
    {
        let check: GateFn = Arc::new(
            move |result: &WaveExecutionResult| -> BoxFuture<'static, GateOutcome> {
                Box::pin(f(result))
            },
        );
        Self {
            name: name.to_string(),
            check: GateCheck::Callback(check),
        }
    }
}

/// A named, ordered list of quality gates.
///
/// When `blocking` is set, any failing gate stops the plan before the
/// next wave starts.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub blocking: bool,
    pub gates: Vec<QualityGate>,
}

impl Checkpoint {
    pub fn new(name: &str, blocking: bool) -> Self {
        Self {
            name: name.to_string(),
            blocking,
            gates: Vec::new(),
        }
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn gate_names(&self) -> Vec<&str> {
        self.gates.iter().map(|g| g.name.as_str()).collect()
    }
}

/// Attaches a checkpoint to one wave, or to every wave when `after_wave` is `None`.
#[derive(Debug, Clone)]
pub struct CheckpointBinding {
    pub after_wave: Option<u32>,
    pub checkpoint: Checkpoint,
}

impl CheckpointBinding {
    pub fn after(wave: u32, checkpoint: Checkpoint) -> Self {
        Self {
            after_wave: Some(wave),
            checkpoint,
        }
    }

    pub fn every_wave(checkpoint: Checkpoint) -> Self {
        Self {
            after_wave: None,
            checkpoint,
        }
    }

    pub fn applies_to(&self, wave: u32) -> bool {
        self.after_wave.map_or(true, |w| w == wave)
    }
}
