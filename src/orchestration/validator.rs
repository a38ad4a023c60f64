//! Checkpoint validator: runs a checkpoint's quality gates after a wave.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::Config;
use crate::core::checkpoint::{Checkpoint, GateCheck, GateOutcome, QualityGate};
use crate::orchestration::report::{FailedGate, WaveExecutionResult};
use crate::util::{duration_ms, with_timeout};
use crate::{wlog_debug, wlog_warn, Error};

/// Default time allowed for a single gate.
pub const DEFAULT_GATE_TIMEOUT_SECS: u64 = 120;

/// Aggregate verdict of one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Every gate passed (or there were none).
    Passed,
    /// Some gate failed on a non-blocking checkpoint.
    Warning,
    /// Some gate failed on a blocking checkpoint; later waves must not start.
    BlockingFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResult {
    pub checkpoint: String,
    pub wave: u32,
    pub blocking: bool,
    pub status: CheckpointStatus,
    /// One entry per gate, in declaration order.
    pub gates: Vec<GateResult>,
}

impl CheckpointResult {
    pub fn passed(&self) -> bool {
        self.status == CheckpointStatus::Passed
    }

    pub fn is_blocking_failure(&self) -> bool {
        self.status == CheckpointStatus::BlockingFailure
    }

    pub fn failed_gate_names(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|g| !g.passed)
            .map(|g| g.gate.clone())
            .collect()
    }

    /// Failed gates in report form.
    pub fn failed_gates(&self) -> Vec<FailedGate> {
        self.gates
            .iter()
            .filter(|g| !g.passed)
            .map(|g| FailedGate {
                checkpoint: self.checkpoint.clone(),
                wave: self.wave,
                gate: g.gate.clone(),
                message: g.message.clone(),
                blocking: self.blocking,
            })
            .collect()
    }
}

/// Evaluates checkpoints. Gates run one at a time, in order, each bounded
/// by the gate timeout; a gate that times out counts as failed.
#[derive(Debug, Clone)]
pub struct CheckpointValidator {
    gate_timeout: Duration,
    workdir: Option<PathBuf>,
}

impl Default for CheckpointValidator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GATE_TIMEOUT_SECS))
    }
}

impl CheckpointValidator {
    pub fn new(gate_timeout: Duration) -> Self {
        Self {
            gate_timeout,
            workdir: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Duration::from_secs(config.gate_timeout_secs))
    }

    /// Directory command gates run in; defaults to the current directory.
    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn gate_timeout(&self) -> Duration {
        self.gate_timeout
    }

    /// Run every gate of `checkpoint` against the wave that just finished.
    pub async fn run_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        wave: &WaveExecutionResult,
    ) -> CheckpointResult {
        wlog_debug!(
            "CheckpointValidator: running {} ({} gates) after wave {}",
            checkpoint.name,
            checkpoint.gates.len(),
            wave.wave
        );

        let mut gates = Vec::with_capacity(checkpoint.gates.len());
        for gate in &checkpoint.gates {
            let started = Instant::now();
            let outcome = self.run_gate(gate, wave).await;
            if !outcome.passed {
                wlog_warn!(
                    "CheckpointValidator: gate {} of {} failed: {}",
                    gate.name,
                    checkpoint.name,
                    outcome.message
                );
            }
            gates.push(GateResult {
                gate: gate.name.clone(),
                passed: outcome.passed,
                message: outcome.message,
                duration_ms: duration_ms(started.elapsed()),
            });
        }

        let status = if gates.iter().all(|g| g.passed) {
            CheckpointStatus::Passed
        } else if checkpoint.blocking {
            CheckpointStatus::BlockingFailure
        } else {
            CheckpointStatus::Warning
        };

        CheckpointResult {
            checkpoint: checkpoint.name.clone(),
            wave: wave.wave,
            blocking: checkpoint.blocking,
            status,
            gates,
        }
    }

    async fn run_gate(&self, gate: &QualityGate, wave: &WaveExecutionResult) -> GateOutcome {
        let check = async {
            match &gate.check {
                GateCheck::NoFailedTasks => Ok(no_failed_tasks(wave)),
                GateCheck::Callback(f) => Ok(f(wave).await),
                GateCheck::Command { program, args } => self.run_command(program, args).await,
            }
        };

        match with_timeout(self.gate_timeout, check).await {
            Ok(outcome) => outcome,
            Err(Error::Timeout(after)) => GateOutcome::fail(format!("gate timed out after {:?}", after)),
            Err(e) => GateOutcome::fail(e.to_string()),
        }
    }

    async fn run_command(&self, program: &str, args: &[String]) -> crate::Result<GateOutcome> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(GateOutcome::pass(if stdout.is_empty() {
                format!("{} passed", program)
            } else {
                stdout
            }))
        } else if stderr.is_empty() {
            Ok(GateOutcome::fail(format!("{} exited with {}", program, output.status)))
        } else {
            Ok(GateOutcome::fail(stderr))
        }
    }
}

fn no_failed_tasks(wave: &WaveExecutionResult) -> GateOutcome {
    let failed = wave.failed_tasks();
    if failed.is_empty() {
        GateOutcome::pass(format!("all {} tasks succeeded", wave.tasks.len()))
    } else {
        GateOutcome::fail(format!(
            "failed tasks: {}",
            failed
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}
