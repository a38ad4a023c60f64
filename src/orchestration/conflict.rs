//! Resource conflict detection between concurrently eligible tasks.
//!
//! Two tasks conflict when their resource footprints overlap: either the
//! same identifier, or one identifier containing the other as a path
//! prefix (`src` overlaps `src/app.ts`). Detection is a pure function so
//! it can be re-evaluated freely as the active set changes.
//!
//! ## Resolution policy
//!
//! - every conflicting task runs on the candidate's agent: **merge** (run
//!   sequentially under that agent)
//! - candidate has lower priority than a conflicting task: **serialize by
//!   priority** (run after it)
//! - otherwise: **serialize by submission order**; active tasks cannot be
//!   preempted, so the candidate runs after them

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};

/// How a detected conflict is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Resolution {
    /// Candidate has lower priority; it runs after the listed tasks.
    SerializeByPriority { after: Vec<TaskId> },
    /// Priorities tie (or the candidate outranks tasks that are already
    /// running); it runs after the listed tasks in submission order.
    SerializeBySubmissionOrder { after: Vec<TaskId> },
    /// Same agent on both sides; the candidate runs right after `into`
    /// under that agent, with no separate retry.
    Merge { agent: String, into: TaskId },
}

impl Resolution {
    /// Tasks that must finish before the candidate may start.
    pub fn waits_for(&self) -> Vec<&TaskId> {
        match self {
            Resolution::SerializeByPriority { after }
            | Resolution::SerializeBySubmissionOrder { after } => after.iter().collect(),
            Resolution::Merge { into, .. } => vec![into],
        }
    }
}

/// Result of comparing a candidate against the active set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetection {
    pub candidate: TaskId,
    /// Active tasks whose footprints overlap the candidate's, sorted by id.
    pub conflicting_tasks: Vec<TaskId>,
    /// Candidate resources that overlap, sorted.
    pub overlapping_resources: Vec<String>,
    /// Grows with overlap count and shrinks as priorities diverge. Zero
    /// when there is no conflict.
    pub severity: f64,
    pub resolution: Option<Resolution>,
}

impl ConflictDetection {
    fn clear(candidate: &Task) -> Self {
        Self {
            candidate: candidate.id.clone(),
            conflicting_tasks: Vec::new(),
            overlapping_resources: Vec::new(),
            severity: 0.0,
            resolution: None,
        }
    }

    pub fn has_conflict(&self) -> bool {
        !self.conflicting_tasks.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        matches!(self.resolution, Some(Resolution::Merge { .. }))
    }
}

/// Strip the decorations that should not affect matching.
fn normalize(resource: &str) -> &str {
    let trimmed = resource.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.trim_end_matches('/')
}

/// Whether two resource identifiers overlap.
///
/// Prefix matching is by path component, so `src/app` does not contain
/// `src/app.ts`.
pub fn resources_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || Path::new(a).starts_with(b) || Path::new(b).starts_with(a)
}

/// Compare a candidate's footprint against every task in the active set.
///
/// Tasks in `active` with the candidate's own id are ignored. The result
/// depends only on the inputs: repeated calls with the same candidate and
/// active set yield identical detections regardless of `active` order.
pub fn detect_conflicts(candidate: &Task, active: &[&Task]) -> ConflictDetection {
    let mut conflicting: BTreeMap<&TaskId, &Task> = BTreeMap::new();
    let mut overlapping: BTreeSet<String> = BTreeSet::new();

    for other in active.iter().copied().filter(|t| t.id != candidate.id) {
        for mine in &candidate.resource_footprint {
            if other
                .resource_footprint
                .iter()
                .any(|theirs| resources_overlap(mine, theirs))
            {
                overlapping.insert(normalize(mine).to_string());
                conflicting.insert(&other.id, other);
            }
        }
    }

    if conflicting.is_empty() {
        return ConflictDetection::clear(candidate);
    }

    let closest_priority_gap = conflicting
        .values()
        .map(|t| (i64::from(t.priority) - i64::from(candidate.priority)).unsigned_abs())
        .min()
        .unwrap_or(0);
    let severity = overlapping.len() as f64 / (1.0 + closest_priority_gap as f64);

    let after: Vec<TaskId> = conflicting.keys().map(|id| (*id).clone()).collect();
    let resolution = if conflicting.values().all(|t| t.agent == candidate.agent) {
        Resolution::Merge {
            agent: candidate.agent.clone(),
            into: after[0].clone(),
        }
    } else if conflicting.values().any(|t| candidate.priority < t.priority) {
        Resolution::SerializeByPriority { after: after.clone() }
    } else {
        Resolution::SerializeBySubmissionOrder { after: after.clone() }
    };

    ConflictDetection {
        candidate: candidate.id.clone(),
        conflicting_tasks: after,
        overlapping_resources: overlapping.into_iter().collect(),
        severity,
        resolution: Some(resolution),
    }
}

/// Registry of currently running tasks.
///
/// Owned by a single wave runner; every check-and-register happens in one
/// `&mut self` call, so conflict evaluation never sees a half-updated view.
#[derive(Debug, Default)]
pub struct ActiveRegistry {
    active: BTreeMap<TaskId, Task>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Run conflict detection for a candidate against the active set.
    pub fn check(&self, candidate: &Task) -> ConflictDetection {
        let active: Vec<&Task> = self.active.values().collect();
        detect_conflicts(candidate, &active)
    }

    /// Register a task for the duration of its execution window.
    ///
    /// # Errors
    /// `ConflictUnresolved` if the task overlaps an active task; nothing is
    /// registered in that case.
    pub fn register(&mut self, task: &Task) -> Result<()> {
        let detection = self.check(task);
        if detection.has_conflict() {
            return Err(Error::ConflictUnresolved {
                task: task.id.clone(),
                reason: format!(
                    "overlaps active tasks [{}] on [{}]",
                    detection
                        .conflicting_tasks
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    detection.overlapping_resources.join(", ")
                ),
            });
        }
        self.active.insert(task.id.clone(), task.clone());
        Ok(())
    }

    pub fn release(&mut self, id: &TaskId) {
        self.active.remove(id);
    }
}
