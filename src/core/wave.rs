//! Waves: dependency-leveled batches of tasks that may run together.

use std::collections::HashMap;

use serde::{Serialize, Serializer};

use crate::core::checkpoint::{Checkpoint, CheckpointBinding};
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};

/// Wave status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    #[default]
    Pending,
    Running,
    Completed,
    /// Fail-fast cancellation or a hard abort stopped the wave.
    Failed,
    /// Never entered because an earlier wave stopped the plan.
    Blocked,
}

impl std::fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveStatus::Pending => write!(f, "pending"),
            WaveStatus::Running => write!(f, "running"),
            WaveStatus::Completed => write!(f, "completed"),
            WaveStatus::Failed => write!(f, "failed"),
            WaveStatus::Blocked => write!(f, "blocked"),
        }
    }
}

fn checkpoint_name<S: Serializer>(
    checkpoint: &Option<Checkpoint>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match checkpoint {
        Some(c) => serializer.serialize_some(&c.name),
        None => serializer.serialize_none(),
    }
}

/// One batch of tasks. Numbers start at 1 and strictly increase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wave {
    pub number: u32,
    /// Task ids ordered by priority (descending), then input order.
    pub task_ids: Vec<TaskId>,
    #[serde(serialize_with = "checkpoint_name")]
    pub checkpoint: Option<Checkpoint>,
    pub status: WaveStatus,
}

impl Wave {
    pub fn new(number: u32, task_ids: Vec<TaskId>) -> Self {
        Self {
            number,
            task_ids,
            checkpoint: None,
            status: WaveStatus::Pending,
        }
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_ids.contains(id)
    }
}

/// The full ordered set of waves derived from one task list, plus the
/// tasks themselves.
///
/// The plan owns the tasks for the duration of a run; their statuses are
/// updated in place as waves execute.
#[derive(Debug, Clone, Serialize)]
pub struct WavePlan {
    waves: Vec<Wave>,
    #[serde(skip)]
    tasks: Vec<Task>,
    /// Position of each task in the original input.
    #[serde(skip)]
    index: HashMap<TaskId, usize>,
    #[serde(skip)]
    wave_of: HashMap<TaskId, u32>,
}

impl WavePlan {
    pub(crate) fn new(tasks: Vec<Task>, waves: Vec<Wave>) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let wave_of = waves
            .iter()
            .flat_map(|w| w.task_ids.iter().map(move |id| (id.clone(), w.number)))
            .collect();
        Self {
            waves,
            tasks,
            index,
            wave_of,
        }
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn waves_mut(&mut self) -> &mut [Wave] {
        &mut self.waves
    }

    pub fn wave(&self, number: u32) -> Option<&Wave> {
        number
            .checked_sub(1)
            .and_then(|i| self.waves.get(i as usize))
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Wave number a task was assigned to.
    pub fn wave_of(&self, id: &TaskId) -> Option<u32> {
        self.wave_of.get(id).copied()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        match self.index.get(id) {
            Some(&i) => self.tasks.get_mut(i),
            None => None,
        }
    }

    /// All tasks in input order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Position of the task in the original input, used as the final tie-break.
    pub fn submission_index(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Tasks of one wave, in wave order.
    pub fn wave_tasks(&self, number: u32) -> Vec<&Task> {
        self.wave(number)
            .map(|w| w.task_ids.iter().filter_map(|id| self.task(id)).collect())
            .unwrap_or_default()
    }

    /// Longest single-task estimate within a wave.
    pub fn wave_estimate_minutes(&self, number: u32) -> f64 {
        self.wave_tasks(number)
            .iter()
            .map(|t| t.estimated_duration_minutes)
            .fold(0.0, f64::max)
    }

    /// Attach checkpoints to waves.
    ///
    /// A binding for a specific wave wins over an every-wave binding.
    /// Binding a wave number that does not exist is a validation error.
    pub fn attach_checkpoints(&mut self, bindings: &[CheckpointBinding]) -> Result<()> {
        let count = self.waves.len() as u32;
        for binding in bindings {
            if let Some(n) = binding.after_wave {
                if n == 0 || n > count {
                    return Err(Error::Validation(format!(
                        "Checkpoint {} targets wave {} but the plan has {} waves",
                        binding.checkpoint.name, n, count
                    )));
                }
            }
        }

        for wave in &mut self.waves {
            let specific = bindings
                .iter()
                .find(|b| b.after_wave == Some(wave.number));
            let fallback = bindings.iter().find(|b| b.after_wave.is_none());
            if let Some(binding) = specific.or(fallback) {
                wave.checkpoint = Some(binding.checkpoint.clone());
            }
        }
        Ok(())
    }
}
