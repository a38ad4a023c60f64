//! Wave runner: executes the tasks of one wave.
//!
//! Every task is checked against the tasks ahead of it in wave order and
//! each conflict is reported once. A task that conflicts only with tasks
//! of its own agent is merged behind the earliest of them. Tasks are
//! dispatched concurrently up to the configured ceiling whenever their
//! footprint is clear of the active registry and of every earlier task
//! still waiting, which keeps conflicting tasks in priority, then
//! submission, order while conflict-free tasks run alongside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentRegistry, AgentResponse};
use crate::config::Config;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::core::wave::{Wave, WaveStatus};
use crate::error::{Error, Result};
use crate::orchestration::conflict::{detect_conflicts, ActiveRegistry, ConflictDetection};
use crate::orchestration::events::{EventSink, PlanEvent};
use crate::orchestration::report::{TaskError, TaskExecutionResult, WaveExecutionResult};
use crate::util::{duration_ms, with_timeout};
use crate::{wlog_debug, wlog_warn};

/// Default number of tasks in flight per wave.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default per-attempt task timeout.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;

/// Configuration for wave execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum tasks in flight at once. Zero is treated as one.
    pub max_concurrency: usize,
    /// Per-attempt timeout. A timed-out task is retried exactly once.
    pub task_timeout: Duration,
    /// Cancel not-yet-started tasks when a critical task fails.
    pub fail_fast: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            fail_fast: false,
        }
    }
}

impl RunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            fail_fast: config.fail_fast,
        }
    }

    fn ceiling(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// A task waiting to be dispatched.
struct Queued {
    task: Task,
    /// Earlier task on the same agent this one was merged behind.
    merged_into: Option<TaskId>,
}

/// What a finished task submission produced.
struct TaskOutcome {
    task_id: TaskId,
    response: std::result::Result<AgentResponse, TaskError>,
    retry_count: u32,
}

enum Step {
    Finished(TaskOutcome),
    Cancelled,
}

/// Executes waves for one plan.
///
/// The runner exclusively owns the active-task registry; nothing else
/// reads or writes it, so several plans can run side by side without
/// interference.
pub struct WaveRunner {
    agents: AgentRegistry,
    config: RunnerConfig,
    registry: ActiveRegistry,
    events: EventSink,
    cancel: CancellationToken,
}

impl WaveRunner {
    pub fn new(
        agents: AgentRegistry,
        config: RunnerConfig,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agents,
            config,
            registry: ActiveRegistry::new(),
            events,
            cancel,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of tasks currently registered as active.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Execute the given tasks of a wave and collect one result per task.
    ///
    /// `tasks` must belong to `wave`; they run in the wave's order
    /// (priority, then submission) subject to conflict serialization.
    /// Task failures and timeouts are recorded in the result, not returned
    /// as errors.
    ///
    /// # Errors
    /// `Validation` if a task is not part of the wave or has no registered
    /// agent; `ConflictUnresolved` if a reservation could not be made.
    pub async fn execute_wave(&mut self, wave: &Wave, tasks: Vec<Task>) -> Result<WaveExecutionResult> {
        let estimate = tasks
            .iter()
            .map(|t| t.estimated_duration_minutes)
            .fold(0.0, f64::max);
        let mut result = WaveExecutionResult::new(wave.number, estimate);
        let ordered = self.order_tasks(wave, tasks)?;

        result.status = WaveStatus::Running;
        result.started_at = Some(Utc::now());
        let started = Instant::now();
        for task in &ordered {
            result
                .tasks
                .insert(task.id.clone(), TaskExecutionResult::pending(task, wave.number));
        }

        wlog_debug!(
            "WaveRunner: wave {} starting with {} tasks (ceiling {})",
            wave.number,
            ordered.len(),
            self.config.ceiling()
        );

        let mut pending = self.queue_tasks(wave.number, ordered, &mut result);
        let mut running: HashMap<TaskId, Task> = HashMap::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, TaskOutcome>> = FuturesUnordered::new();
        let mut tripped: Option<TaskId> = None;
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                self.abort(&mut pending, &mut running, &mut result);
                break;
            }

            if tripped.is_none() {
                self.dispatch(wave.number, &mut pending, &mut running, &mut in_flight, &mut result)?;
            }

            if in_flight.is_empty() {
                break;
            }

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                Some(outcome) = in_flight.next() => Step::Finished(outcome),
            };

            let outcome = match step {
                Step::Finished(outcome) => outcome,
                Step::Cancelled => {
                    drop(in_flight);
                    self.abort(&mut pending, &mut running, &mut result);
                    break;
                }
            };

            let Some(task) = running.remove(&outcome.task_id) else {
                continue;
            };
            self.registry.release(&task.id);
            let failed_critical = self.record_outcome(wave.number, &task, outcome, &mut result);

            if let Some(trigger) = failed_critical.filter(|_| self.config.fail_fast) {
                wlog_warn!(
                    "WaveRunner: critical task {} failed in fail-fast wave {}, cancelling pending tasks",
                    trigger,
                    wave.number
                );
                skip_all(
                    pending.drain(..).map(|q| q.task),
                    &mut result,
                    TaskError::FailFast {
                        trigger: trigger.clone(),
                    },
                );
                tripped = Some(trigger);
            }
        }

        result.status = if cancel.is_cancelled() || tripped.is_some() {
            WaveStatus::Failed
        } else {
            WaveStatus::Completed
        };
        result.ended_at = Some(Utc::now());
        result.duration_ms = duration_ms(started.elapsed());

        wlog_debug!(
            "WaveRunner: wave {} {} ({} completed, {} failed, {} skipped, {} conflicts)",
            wave.number,
            result.status,
            result.count(TaskStatus::Completed),
            result.count(TaskStatus::Failed),
            result.count(TaskStatus::Skipped),
            result.conflicts.len()
        );
        Ok(result)
    }

    /// Sort tasks into wave order and check they can run.
    fn order_tasks(&self, wave: &Wave, tasks: Vec<Task>) -> Result<Vec<Task>> {
        let position: HashMap<&TaskId, usize> = wave
            .task_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut keyed = Vec::with_capacity(tasks.len());
        for task in tasks {
            let Some(&pos) = position.get(&task.id) else {
                return Err(Error::Validation(format!(
                    "Task {} is not part of wave {}",
                    task.id, wave.number
                )));
            };
            if self.agents.get(&task.agent).is_none() {
                return Err(Error::UnknownAgent {
                    task: task.id.clone(),
                    agent: task.agent.clone(),
                });
            }
            keyed.push((pos, task));
        }
        keyed.sort_by_key(|(pos, _)| *pos);
        Ok(keyed.into_iter().map(|(_, t)| t).collect())
    }

    /// Check each task against the tasks ahead of it in wave order and
    /// report every conflict once. Same-agent conflicts are merged behind
    /// the earliest task they conflict with.
    fn queue_tasks(&self, wave: u32, ordered: Vec<Task>, result: &mut WaveExecutionResult) -> Vec<Queued> {
        let mut queue: Vec<Queued> = Vec::with_capacity(ordered.len());

        for task in ordered {
            let detection = {
                let ahead: Vec<&Task> = queue.iter().map(|q| &q.task).collect();
                detect_conflicts(&task, &ahead)
            };
            if !detection.has_conflict() {
                queue.push(Queued { task, merged_into: None });
                continue;
            }

            let merged_into = detection
                .is_merge()
                .then(|| {
                    queue
                        .iter()
                        .find(|q| detection.conflicting_tasks.contains(&q.task.id))
                        .map(|q| q.task.id.clone())
                })
                .flatten();
            if let Some(host) = &merged_into {
                wlog_debug!("WaveRunner: merging task {} behind {} (agent {})", task.id, host, task.agent);
                if let Some(entry) = result.tasks.get_mut(&task.id) {
                    entry.merged_into = Some(host.clone());
                }
            }
            self.report_conflict(wave, detection, result);
            queue.push(Queued { task, merged_into });
        }

        queue
    }

    /// Start every waiting task that is clear to run, in order, up to the ceiling.
    ///
    /// A task is clear when it overlaps neither an active task nor a task
    /// still waiting ahead of it.
    fn dispatch(
        &mut self,
        wave: u32,
        pending: &mut Vec<Queued>,
        running: &mut HashMap<TaskId, Task>,
        in_flight: &mut FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
        result: &mut WaveExecutionResult,
    ) -> Result<()> {
        let mut i = 0;
        while i < pending.len() && in_flight.len() < self.config.ceiling() {
            let candidate = &pending[i].task;
            let held_back = self.registry.check(candidate).has_conflict()
                || pending[..i]
                    .iter()
                    .any(|earlier| detect_conflicts(candidate, &[&earlier.task]).has_conflict());
            if held_back {
                i += 1;
                continue;
            }

            let Queued { mut task, merged_into } = pending.remove(i);
            self.registry.register(&task)?;
            task.start();
            // Merged tasks share their host's agent slot and get no retry.
            let future = self.start_task(wave, &task, merged_into.is_none(), result)?;
            in_flight.push(future);
            running.insert(task.id.clone(), task);
        }
        Ok(())
    }

    /// Mark a task running and build its submission future.
    fn start_task(
        &self,
        wave: u32,
        task: &Task,
        allow_retry: bool,
        result: &mut WaveExecutionResult,
    ) -> Result<BoxFuture<'static, TaskOutcome>> {
        let agent = self.agents.get(&task.agent).ok_or_else(|| Error::UnknownAgent {
            task: task.id.clone(),
            agent: task.agent.clone(),
        })?;

        if let Some(entry) = result.tasks.get_mut(&task.id) {
            entry.status = TaskStatus::Running;
            entry.started_at = Some(Utc::now());
        }
        self.events.emit(PlanEvent::TaskStarted {
            task_id: task.id.clone(),
            wave,
            agent: task.agent.clone(),
            attempt: 1,
            timestamp: Utc::now(),
        });
        wlog_debug!("WaveRunner: task {} started on agent {}", task.id, task.agent);

        Ok(submit_with_retry(
            agent,
            task.clone(),
            wave,
            self.config.task_timeout,
            allow_retry,
            self.events.clone(),
        )
        .boxed())
    }

    /// Record a finished task. Returns the task id if it was a critical failure.
    fn record_outcome(
        &self,
        wave: u32,
        task: &Task,
        outcome: TaskOutcome,
        result: &mut WaveExecutionResult,
    ) -> Option<TaskId> {
        let Some(entry) = result.tasks.get_mut(&outcome.task_id) else {
            return None;
        };
        entry.ended_at = Some(Utc::now());
        entry.retry_count = outcome.retry_count;

        match outcome.response {
            Ok(response) if response.success => {
                entry.status = TaskStatus::Completed;
                entry.output = response.output;
            }
            Ok(response) => {
                entry.status = TaskStatus::Failed;
                entry.output = response.output;
                entry.error = Some(TaskError::Agent {
                    message: response
                        .error
                        .unwrap_or_else(|| "agent reported failure".to_string()),
                });
            }
            Err(error) => {
                entry.status = TaskStatus::Failed;
                entry.error = Some(error);
            }
        }

        match &entry.error {
            Some(error) if error.is_timeout() => wlog_warn!(
                "WaveRunner: task {} timed out after {} attempt(s)",
                entry.task_id,
                entry.retry_count + 1
            ),
            Some(error) if entry.status == TaskStatus::Failed => {
                wlog_warn!("WaveRunner: task {} failed: {}", entry.task_id, error)
            }
            _ => {}
        }

        self.events.emit(PlanEvent::TaskCompleted {
            task_id: entry.task_id.clone(),
            wave,
            status: entry.status,
            timestamp: Utc::now(),
        });

        (task.is_critical() && entry.status == TaskStatus::Failed).then(|| entry.task_id.clone())
    }

    fn report_conflict(&self, wave: u32, detection: ConflictDetection, result: &mut WaveExecutionResult) {
        wlog_debug!(
            "WaveRunner: task {} conflicts with {:?} on {:?}",
            detection.candidate,
            detection.conflicting_tasks,
            detection.overlapping_resources
        );
        self.events.emit(PlanEvent::TaskConflictDetected {
            task_id: detection.candidate.clone(),
            wave,
            conflicting_with: detection.conflicting_tasks.clone(),
            resources: detection.overlapping_resources.clone(),
            timestamp: Utc::now(),
        });
        result.conflicts.push(detection);
    }

    /// Hard abort: skip everything not yet dispatched and abandon in-flight tasks.
    fn abort(
        &mut self,
        pending: &mut Vec<Queued>,
        running: &mut HashMap<TaskId, Task>,
        result: &mut WaveExecutionResult,
    ) {
        wlog_warn!(
            "WaveRunner: wave {} aborted with {} tasks in flight",
            result.wave,
            running.len()
        );
        let now = Utc::now();
        for (id, _) in running.drain() {
            if let Some(entry) = result.tasks.get_mut(&id) {
                entry.status = TaskStatus::Skipped;
                entry.cancelled = true;
                entry.ended_at = Some(now);
                entry.error = Some(TaskError::Cancelled);
            }
            self.registry.release(&id);
        }
        skip_all(pending.drain(..).map(|q| q.task), result, TaskError::Cancelled);
    }
}

fn skip_all(tasks: impl Iterator<Item = Task>, result: &mut WaveExecutionResult, error: TaskError) {
    for task in tasks {
        if let Some(entry) = result.tasks.get_mut(&task.id) {
            entry.status = TaskStatus::Skipped;
            entry.error = Some(error.clone());
        }
    }
}

/// Submit a task with a bounded wait, retrying exactly once on timeout.
async fn submit_with_retry(
    agent: Arc<Agent>,
    task: Task,
    wave: u32,
    timeout: Duration,
    allow_retry: bool,
    events: EventSink,
) -> TaskOutcome {
    let mut retry_count = 0;
    loop {
        let response = match with_timeout(timeout, agent.submit(&task)).await {
            Ok(response) => Ok(response),
            Err(Error::Timeout(after)) => {
                let error = TaskError::Timeout {
                    after_ms: duration_ms(after),
                };
                if allow_retry && retry_count == 0 {
                    retry_count += 1;
                    wlog_warn!("WaveRunner: task {} timed out, retrying once", task.id);
                    events.emit(PlanEvent::TaskRetrying {
                        task_id: task.id.clone(),
                        wave,
                        error,
                        timestamp: Utc::now(),
                    });
                    continue;
                }
                Err(error)
            }
            Err(e) => Err(TaskError::Submission {
                message: e.to_string(),
            }),
        };

        return TaskOutcome {
            task_id: task.id.clone(),
            response,
            retry_count,
        };
    }
}
