//! Plan files: tasks, agents and checkpoints in one TOML or JSON document.
//!
//! ```toml
//! [agents.coder]
//! command = "claude"
//! args = ["-p"]
//!
//! [[tasks]]
//! id = "api"
//! agent = "coder"
//! resourceFootprint = ["src/api.rs"]
//! priority = 2
//! estimatedDurationMinutes = 15
//!
//! [[checkpoints]]
//! name = "tests"
//! blocking = true
//! afterWave = 1
//!
//! [[checkpoints.gates]]
//! name = "unit"
//! command = "cargo test"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::agent::{Agent, AgentRegistry, CommandAgent};
use crate::core::checkpoint::{Checkpoint, CheckpointBinding, GateCheck, QualityGate};
use crate::core::task::Task;
use crate::{wlog_debug, Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanFile {
    #[serde(default)]
    agents: BTreeMap<String, AgentSpec>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    checkpoints: Vec<CheckpointSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AgentSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CheckpointSpec {
    name: String,
    #[serde(default)]
    blocking: bool,
    after_wave: Option<u32>,
    #[serde(default)]
    gates: Vec<GateSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GateSpec {
    name: String,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    no_failed_tasks: bool,
}

/// Split `command` into program and args unless args were given separately.
fn command_parts(command: &str, args: &[String]) -> Result<(String, Vec<String>)> {
    if args.is_empty() {
        let agent = CommandAgent::from_command_line(command)?;
        Ok((agent.binary().to_string(), agent.args().to_vec()))
    } else if command.trim().is_empty() {
        Err(Error::Validation("command is empty".to_string()))
    } else {
        Ok((command.trim().to_string(), args.to_vec()))
    }
}

impl GateSpec {
    fn into_gate(self, checkpoint: &str) -> Result<QualityGate> {
        let check = match (self.command, self.no_failed_tasks) {
            (Some(command), false) => {
                let (program, args) = command_parts(&command, &self.args)?;
                GateCheck::Command { program, args }
            }
            (None, true) => GateCheck::NoFailedTasks,
            _ => {
                return Err(Error::Validation(format!(
                    "Gate {} of checkpoint {} needs exactly one of command or noFailedTasks",
                    self.name, checkpoint
                )))
            }
        };
        Ok(QualityGate {
            name: self.name,
            check,
        })
    }
}

/// A loaded plan, ready for [`PlanCoordinator::execute`](crate::PlanCoordinator::execute).
#[derive(Debug)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub agents: AgentRegistry,
    pub checkpoints: Vec<CheckpointBinding>,
    /// Directory agents and command gates run in: the plan file's directory.
    pub base_dir: Option<PathBuf>,
    commands: Vec<(String, CommandAgent)>,
}

impl Plan {
    /// Load a plan file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        wlog_debug!("Plan::load path={}", path.display());
        let contents = fs::read_to_string(path)?;
        let file: PlanFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => toml::from_str(&contents)?,
        };
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        Self::build(file, base_dir)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Self::build(toml::from_str(contents)?, None)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        Self::build(serde_json::from_str(contents)?, None)
    }

    fn build(file: PlanFile, base_dir: Option<PathBuf>) -> Result<Self> {
        let mut agents = AgentRegistry::new();
        let mut commands = Vec::with_capacity(file.agents.len());
        for (name, spec) in file.agents {
            let (program, args) = command_parts(&spec.command, &spec.args)?;
            let mut agent = CommandAgent::new(&program, &args);
            if let Some(dir) = &base_dir {
                agent = agent.with_workdir(dir.clone());
            }
            agents.register(&name, Agent::Command(agent.clone()));
            commands.push((name, agent));
        }

        let mut checkpoints = Vec::with_capacity(file.checkpoints.len());
        for spec in file.checkpoints {
            let mut checkpoint = Checkpoint::new(&spec.name, spec.blocking);
            for gate in spec.gates {
                checkpoint = checkpoint.with_gate(gate.into_gate(&spec.name)?);
            }
            checkpoints.push(CheckpointBinding {
                after_wave: spec.after_wave,
                checkpoint,
            });
        }

        wlog_debug!(
            "Plan built: {} tasks, {} agents, {} checkpoints",
            file.tasks.len(),
            agents.len(),
            checkpoints.len()
        );
        Ok(Self {
            tasks: file.tasks,
            agents,
            checkpoints,
            base_dir,
            commands,
        })
    }

    /// Agents whose program cannot be found on `PATH`.
    pub fn missing_agents(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|(_, agent)| !agent.is_available())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
