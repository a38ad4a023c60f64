//! Task DAG (Directed Acyclic Graph) and wave leveling.
//!
//! This module turns a flat task list with `dependsOn` edges into a
//! petgraph graph, rejects cycles, and levels the tasks into waves so
//! that every dependency lands in an earlier wave than its dependents.

use crate::core::task::{Task, TaskId};
use crate::core::wave::{Wave, WavePlan};
use crate::error::{Error, Result};
use crate::wlog_debug;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// DFS coloring used for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// The task dependency graph.
///
/// Nodes carry task ids in input order; an edge `a -> b` means `b`
/// depends on `a`.
pub struct TaskDAG {
    graph: DiGraph<TaskId, ()>,
}

impl TaskDAG {
    /// Build the graph from a task list.
    ///
    /// # Errors
    /// - `DuplicateTask` if two tasks share an id
    /// - `UnknownDependency` if a task depends on an id not in the list
    ///
    /// Cycles are not rejected here; see [`TaskDAG::find_cycle`].
    pub fn from_tasks(tasks: &[Task]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut task_index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if task_index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id.clone()));
            }
            let index = graph.add_node(task.id.clone());
            task_index.insert(task.id.clone(), index);
        }

        for task in tasks {
            let to = task_index[&task.id];
            for dep in &task.depends_on {
                let from = task_index
                    .get(dep)
                    .ok_or_else(|| Error::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.update_edge(*from, to, ());
            }
        }

        Ok(Self { graph })
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Find a dependency cycle with white/grey/black DFS coloring.
    ///
    /// Walks `dependsOn` edges starting from each task in input order.
    /// Returns the cycle as a path that starts and ends on the same task,
    /// e.g. `[a, b, a]` for "a depends on b depends on a".
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut color = vec![Color::White; self.graph.node_count()];

        for root in self.graph.node_indices() {
            if color[root.index()] != Color::White {
                continue;
            }

            // Explicit stack of (node, remaining dependencies) avoids
            // recursion depth limits on long chains.
            let mut path: Vec<NodeIndex> = vec![root];
            let mut stack: Vec<Vec<NodeIndex>> = vec![self.sorted_dependencies(root)];
            color[root.index()] = Color::Grey;

            while let Some(pending) = stack.last_mut() {
                match pending.pop() {
                    Some(next) => match color[next.index()] {
                        Color::White => {
                            color[next.index()] = Color::Grey;
                            path.push(next);
                            stack.push(self.sorted_dependencies(next));
                        }
                        Color::Grey => {
                            let start = path.iter().position(|&n| n == next).unwrap_or(0);
                            let mut cycle: Vec<TaskId> =
                                path[start..].iter().map(|&n| self.graph[n].clone()).collect();
                            cycle.push(self.graph[next].clone());
                            return Some(cycle);
                        }
                        Color::Black => {}
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            color[done.index()] = Color::Black;
                        }
                    }
                }
            }
        }

        None
    }

    /// Dependencies of a node, reversed so that `pop()` visits them in input order.
    fn sorted_dependencies(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        deps.sort_by(|a, b| b.cmp(a));
        deps
    }

    /// Compute each task's level: 0 without dependencies, otherwise one
    /// more than its deepest dependency.
    ///
    /// # Errors
    /// Returns `CyclicDependency` naming the cycle if the graph is cyclic.
    pub fn levels(&self) -> Result<HashMap<TaskId, u32>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }

        let order = toposort(&self.graph, None).map_err(|cycle| Error::CyclicDependency {
            cycle: vec![self.graph[cycle.node_id()].clone()],
        })?;

        let mut levels: HashMap<NodeIndex, u32> = HashMap::with_capacity(order.len());
        for node in order {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| levels.get(&dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            levels.insert(node, level);
        }

        Ok(levels
            .into_iter()
            .map(|(node, level)| (self.graph[node].clone(), level))
            .collect())
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Level a task list into waves.
///
/// Tasks sharing a level form one wave numbered `level + 1`. Inside a
/// wave, tasks are ordered by priority (descending), then input order.
/// Execution order within a wave is decided later by the wave runner.
///
/// # Errors
/// `DuplicateTask`, `UnknownDependency`, or `CyclicDependency`. No wave is
/// produced when any of these occur.
pub fn build_waves(tasks: Vec<Task>) -> Result<WavePlan> {
    let dag = TaskDAG::from_tasks(&tasks)?;
    let levels = dag.levels()?;

    let wave_count = levels.values().max().map_or(0, |max| max + 1);
    let mut buckets: Vec<Vec<(usize, &Task)>> = vec![Vec::new(); wave_count as usize];
    for (position, task) in tasks.iter().enumerate() {
        let level = levels[&task.id];
        buckets[level as usize].push((position, task));
    }

    let waves: Vec<Wave> = buckets
        .into_iter()
        .enumerate()
        .map(|(level, mut members)| {
            members.sort_by(|(pa, a), (pb, b)| b.priority.cmp(&a.priority).then(pa.cmp(pb)));
            let ids = members.into_iter().map(|(_, t)| t.id.clone()).collect();
            Wave::new(level as u32 + 1, ids)
        })
        .collect();

    wlog_debug!(
        "build_waves: {} tasks, {} dependencies, {} waves",
        dag.task_count(),
        dag.dependency_count(),
        waves.len()
    );

    Ok(WavePlan::new(tasks, waves))
}
