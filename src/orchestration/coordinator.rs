//! Plan coordinator: the top-level state machine.
//!
//! ```text
//! PLAN_PENDING -> WAVE_n_RUNNING -> CHECKPOINT_n_RUNNING -> WAVE_n+1_RUNNING ...
//!                                                        \-> BLOCKED | COMPLETED | FAILED
//! ```
//!
//! Each plan gets its own [`WaveRunner`], so several coordinators can run
//! side by side without sharing any mutable state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::core::checkpoint::CheckpointBinding;
use crate::core::dag::build_waves;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::core::wave::{WavePlan, WaveStatus};
use crate::error::Result;
use crate::orchestration::events::{EventSink, PlanEvent};
use crate::orchestration::report::{
    FailedGate, PlanExecutionResult, TaskError, TaskExecutionResult, TimingMetrics,
    WaveExecutionResult,
};
use crate::orchestration::runner::{RunnerConfig, WaveRunner};
use crate::orchestration::validator::{CheckpointValidator, DEFAULT_GATE_TIMEOUT_SECS};
use crate::{wlog, wlog_debug, wlog_warn};

/// Where a plan is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanState {
    #[default]
    Pending,
    WaveRunning { wave: u32 },
    CheckpointRunning { wave: u32 },
    Blocked,
    Completed,
    Failed,
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanState::Blocked | PlanState::Completed | PlanState::Failed)
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanState::Pending => write!(f, "PLAN_PENDING"),
            PlanState::WaveRunning { wave } => write!(f, "WAVE_{}_RUNNING", wave),
            PlanState::CheckpointRunning { wave } => write!(f, "CHECKPOINT_{}_RUNNING", wave),
            PlanState::Blocked => write!(f, "BLOCKED"),
            PlanState::Completed => write!(f, "COMPLETED"),
            PlanState::Failed => write!(f, "FAILED"),
        }
    }
}

impl Serialize for PlanState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Everything the coordinator needs besides the agents.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub runner: RunnerConfig,
    pub gate_timeout: Duration,
    /// Run tasks even when a dependency failed or was skipped.
    pub proceed_on_failed_dependency: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            gate_timeout: Duration::from_secs(DEFAULT_GATE_TIMEOUT_SECS),
            proceed_on_failed_dependency: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            runner: RunnerConfig::from_config(config),
            gate_timeout: Duration::from_secs(config.gate_timeout_secs),
            proceed_on_failed_dependency: config.proceed_on_failed_dependency,
        }
    }
}

/// Why the plan stopped before its last wave.
#[derive(Debug, Clone, Copy)]
enum Stop {
    Blocked { wave: u32 },
    Failed { wave: u32 },
    Aborted { wave: u32 },
}

impl Stop {
    fn wave(&self) -> u32 {
        match self {
            Stop::Blocked { wave } | Stop::Failed { wave } | Stop::Aborted { wave } => *wave,
        }
    }

    fn state(&self) -> PlanState {
        match self {
            Stop::Blocked { .. } => PlanState::Blocked,
            Stop::Failed { .. } | Stop::Aborted { .. } => PlanState::Failed,
        }
    }

    fn skip_error(&self) -> TaskError {
        match self {
            Stop::Aborted { .. } => TaskError::Cancelled,
            Stop::Blocked { wave } | Stop::Failed { wave } => TaskError::Blocked { wave: *wave },
        }
    }
}

/// Drives a task list through dependency leveling, wave execution and
/// checkpoint validation, and produces the plan report.
pub struct PlanCoordinator {
    config: CoordinatorConfig,
    agents: AgentRegistry,
    validator: CheckpointValidator,
    events: EventSink,
    cancel: CancellationToken,
    state: PlanState,
    plan_id: String,
}

impl PlanCoordinator {
    pub fn new(config: CoordinatorConfig, agents: AgentRegistry) -> Self {
        let validator = CheckpointValidator::new(config.gate_timeout);
        Self {
            config,
            agents,
            validator,
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
            state: PlanState::Pending,
            plan_id: Uuid::new_v4().to_string(),
        }
    }

    /// Replace the checkpoint validator (e.g. to run command gates in another directory).
    pub fn with_validator(mut self, validator: CheckpointValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Open the event channel. Events emitted before this call are lost.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlanEvent> {
        let (sink, rx) = EventSink::channel();
        self.events = sink;
        rx
    }

    /// Token that aborts the current (or next) run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Hard abort: skip everything not yet dispatched and abandon in-flight tasks.
    pub fn abort(&self) {
        wlog_warn!("PlanCoordinator: abort requested for plan {}", self.plan_id);
        self.cancel.cancel();
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    fn transition(&mut self, next: PlanState) {
        wlog_debug!("PlanCoordinator: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Execute a plan to a terminal state.
    ///
    /// Blocking checkpoint failures, fail-fast stops and aborts are reported
    /// through the returned report's state; use
    /// [`PlanExecutionResult::ensure_success`] to turn them into errors.
    ///
    /// # Errors
    /// Fails before any wave runs on a dependency cycle, duplicate or
    /// unknown task ids, unknown agents, or invalid checkpoint bindings.
    pub async fn execute(
        &mut self,
        tasks: Vec<Task>,
        bindings: &[CheckpointBinding],
    ) -> Result<PlanExecutionResult> {
        let result = self.run(tasks, bindings).await;
        // An abort ends this run only; the next run gets a fresh token.
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        result
    }

    async fn run(&mut self, tasks: Vec<Task>, bindings: &[CheckpointBinding]) -> Result<PlanExecutionResult> {
        let mut plan = match self.prepare(tasks, bindings) {
            Ok(plan) => plan,
            Err(e) => {
                wlog_warn!("PlanCoordinator: plan {} rejected: {}", self.plan_id, e);
                self.transition(PlanState::Failed);
                return Err(e);
            }
        };

        wlog!(
            "PlanCoordinator: plan {} starting ({} tasks in {} waves)",
            self.plan_id,
            plan.task_count(),
            plan.wave_count()
        );
        let started_at = Utc::now();
        self.events.emit(PlanEvent::PlanStarted {
            plan_id: self.plan_id.clone(),
            waves: plan.wave_count(),
            tasks: plan.task_count(),
            timestamp: started_at,
        });

        let mut runner = WaveRunner::new(
            self.agents.clone(),
            self.config.runner.clone(),
            self.events.clone(),
            self.cancel.child_token(),
        );

        let mut waves: Vec<WaveExecutionResult> = Vec::with_capacity(plan.wave_count());
        let mut failed_gates: Vec<FailedGate> = Vec::new();
        let mut degraded = false;
        let mut stop: Option<Stop> = None;
        let mut first_start: Option<Instant> = None;
        let mut last_end: Option<Instant> = None;

        for number in 1..=plan.wave_count() as u32 {
            if stop.is_none() && self.cancel.is_cancelled() {
                stop = Some(Stop::Aborted { wave: number });
            }
            if let Some(reason) = stop {
                waves.push(block_wave(&mut plan, number, reason.skip_error()));
                continue;
            }

            self.transition(PlanState::WaveRunning { wave: number });
            first_start.get_or_insert_with(Instant::now);
            let mut result = self.run_wave(&mut runner, &mut plan, number).await?;
            last_end = Some(Instant::now());

            if result.status == WaveStatus::Failed {
                stop = Some(if self.cancel.is_cancelled() {
                    Stop::Aborted { wave: number }
                } else {
                    Stop::Failed { wave: number }
                });
            } else if let Some(checkpoint) = plan.wave(number).and_then(|w| w.checkpoint.clone()) {
                self.transition(PlanState::CheckpointRunning { wave: number });
                let outcome = self.validator.run_checkpoint(&checkpoint, &result).await;

                if !outcome.passed() {
                    self.events.emit(PlanEvent::CheckpointFailed {
                        checkpoint: outcome.checkpoint.clone(),
                        wave: number,
                        blocking: outcome.blocking,
                        failed_gates: outcome.failed_gate_names(),
                        timestamp: Utc::now(),
                    });
                    failed_gates.extend(outcome.failed_gates());
                    if outcome.is_blocking_failure() {
                        wlog_warn!(
                            "PlanCoordinator: blocking checkpoint {} failed after wave {}",
                            checkpoint.name,
                            number
                        );
                        stop = Some(Stop::Blocked { wave: number });
                    } else {
                        degraded = true;
                    }
                }
                result.checkpoint = Some(outcome);
            }

            degraded |= result.has_failures();
            waves.push(result);
        }

        let state = stop.map_or(PlanState::Completed, |s| s.state());
        self.transition(state);

        let sequential: f64 = (1..=plan.wave_count() as u32)
            .map(|n| plan.wave_estimate_minutes(n))
            .sum();
        let actual = match (first_start, last_end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        };
        let tasks: BTreeMap<TaskId, TaskExecutionResult> = waves
            .iter()
            .flat_map(|w| w.tasks.iter().map(|(id, r)| (id.clone(), r.clone())))
            .collect();

        let report = PlanExecutionResult {
            plan_id: self.plan_id.clone(),
            state,
            degraded: degraded && state == PlanState::Completed,
            stopped_at_wave: stop.map(|s| s.wave()),
            started_at,
            ended_at: Utc::now(),
            waves,
            tasks,
            failed_gates,
            metrics: TimingMetrics::compute(sequential, actual),
        };

        wlog!(
            "PlanCoordinator: plan {} finished {} ({:.1}% faster than sequential)",
            self.plan_id,
            state,
            report.metrics.percentage_faster
        );
        self.events.emit(PlanEvent::PlanCompleted {
            plan_id: self.plan_id.clone(),
            state,
            timestamp: report.ended_at,
        });
        Ok(report)
    }

    fn prepare(&mut self, tasks: Vec<Task>, bindings: &[CheckpointBinding]) -> Result<WavePlan> {
        self.plan_id = Uuid::new_v4().to_string();
        self.state = PlanState::Pending;
        self.agents.validate(&tasks)?;
        let mut plan = build_waves(tasks)?;
        plan.attach_checkpoints(bindings)?;
        Ok(plan)
    }

    async fn run_wave(
        &mut self,
        runner: &mut WaveRunner,
        plan: &mut WavePlan,
        number: u32,
    ) -> Result<WaveExecutionResult> {
        let Some(wave) = plan.wave(number).cloned() else {
            return Ok(WaveExecutionResult::new(number, 0.0));
        };

        let mut runnable = Vec::with_capacity(wave.len());
        let mut skipped = Vec::new();
        for id in &wave.task_ids {
            let Some(task) = plan.task(id) else { continue };
            let unmet = task
                .depends_on
                .iter()
                .find(|dep| plan.task(dep).map(|d| d.status) != Some(TaskStatus::Completed));
            match unmet {
                Some(dep) if !self.config.proceed_on_failed_dependency => {
                    wlog_debug!("PlanCoordinator: skipping {} (dependency {} did not complete)", id, dep);
                    skipped.push(TaskExecutionResult::skipped(
                        task,
                        number,
                        TaskError::DependencyNotCompleted {
                            dependency: dep.clone(),
                        },
                    ));
                }
                _ => runnable.push(task.clone()),
            }
        }

        if let Some(w) = plan.waves_mut().get_mut(number as usize - 1) {
            w.status = WaveStatus::Running;
        }
        self.events.emit(PlanEvent::WaveStarted {
            wave: number,
            tasks: wave.task_ids.clone(),
            timestamp: Utc::now(),
        });

        let mut result = runner.execute_wave(&wave, runnable).await?;
        result.estimated_minutes = plan.wave_estimate_minutes(number);
        for entry in skipped {
            result.tasks.insert(entry.task_id.clone(), entry);
        }

        for entry in result.tasks.values() {
            if let Some(task) = plan.task_mut(&entry.task_id) {
                task.status = entry.status;
            }
        }
        if let Some(w) = plan.waves_mut().get_mut(number as usize - 1) {
            w.status = result.status;
        }

        self.events.emit(PlanEvent::WaveCompleted {
            wave: number,
            status: result.status,
            timestamp: Utc::now(),
        });
        Ok(result)
    }
}

/// Record a wave that never started.
fn block_wave(plan: &mut WavePlan, number: u32, error: TaskError) -> WaveExecutionResult {
    let mut result = WaveExecutionResult::new(number, plan.wave_estimate_minutes(number));
    result.status = WaveStatus::Blocked;

    let ids: Vec<TaskId> = plan
        .wave(number)
        .map(|w| w.task_ids.clone())
        .unwrap_or_default();
    for id in ids {
        if let Some(task) = plan.task_mut(&id) {
            task.skip();
            result.tasks.insert(
                id.clone(),
                TaskExecutionResult::skipped(task, number, error.clone()),
            );
        }
    }
    if let Some(w) = plan.waves_mut().get_mut(number as usize - 1) {
        w.status = WaveStatus::Blocked;
    }
    result
}
