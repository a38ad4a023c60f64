//! Agents: the external workers that perform tasks.
//!
//! Each agent kind is a fixed enum variant chosen when the registry is
//! built, so a task's agent is resolved before any wave runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::task::Task;
use crate::{wlog_debug, Error, Result};

/// What an agent reports back for a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Runs an external program per task.
///
/// The task is written to stdin as JSON and its id is exported as
/// `WAVEFRONT_TASK_ID`. Exit status zero means success; stdout becomes
/// the output and stderr the error message. The child is killed if the
/// submission is dropped (timeout or abort).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandAgent {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            workdir: None,
        }
    }

    /// Split a whitespace-separated command line into program and args.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation("Agent command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            workdir: None,
        })
    }

    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn binary(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }

    async fn submit(&self, task: &Task) -> Result<AgentResponse> {
        let payload = serde_json::to_vec(task)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("WAVEFRONT_TASK_ID", task.id.as_str())
            .env("WAVEFRONT_TASK_AGENT", &task.agent)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        wlog_debug!("CommandAgent: spawning {} for task {}", self.program, task.id);
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // Programs that ignore stdin may exit before reading it.
            let _ = stdin.write_all(&payload).await;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(AgentResponse {
                success: true,
                output: Some(stdout),
                error: None,
            })
        } else {
            let error = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            Ok(AgentResponse {
                success: false,
                output: (!stdout.is_empty()).then_some(stdout),
                error: Some(error),
            })
        }
    }
}

/// Caller-supplied submission function.
pub type SubmitFn = Arc<dyn Fn(Task) -> BoxFuture<'static, AgentResponse> + Send + Sync>;

/// Agent backed by an async closure, for embedding and tests.
#[derive(Clone)]
pub struct CallbackAgent {
    submit: SubmitFn,
}

impl CallbackAgent {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AgentResponse> + Send + 'static,
    {
        let submit: SubmitFn =
            Arc::new(move |task: Task| -> BoxFuture<'static, AgentResponse> { Box::pin(f(task)) });
        Self { submit }
    }
}

impl std::fmt::Debug for CallbackAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallbackAgent(..)")
    }
}

/// A worker capable of performing tasks.
#[derive(Debug, Clone)]
pub enum Agent {
    Command(CommandAgent),
    Callback(CallbackAgent),
}

impl Agent {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AgentResponse> + Send + 'static,
    {
        Agent::Callback(CallbackAgent::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Agent::Command(_) => "command",
            Agent::Callback(_) => "callback",
        }
    }

    /// Submit a task and wait for the agent's response.
    ///
    /// `Err` means the submission itself failed (e.g. the program could
    /// not be spawned); a task the agent ran and reported as failed comes
    /// back as `Ok` with `success == false`.
    pub async fn submit(&self, task: &Task) -> Result<AgentResponse> {
        match self {
            Agent::Command(agent) => agent.submit(task).await,
            Agent::Callback(agent) => Ok((agent.submit)(task.clone()).await),
        }
    }
}

/// Agents by identifier.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, agent: Agent) {
        self.agents.insert(name.to_string(), Arc::new(agent));
    }

    pub fn with(mut self, name: &str, agent: Agent) -> Self {
        self.register(name, agent);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Sorted agent identifiers.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check that every task's agent is registered.
    pub fn validate(&self, tasks: &[Task]) -> Result<()> {
        match tasks.iter().find(|t| !self.agents.contains_key(&t.agent)) {
            Some(task) => Err(Error::UnknownAgent {
                task: task.id.clone(),
                agent: task.agent.clone(),
            }),
            None => Ok(()),
        }
    }
}
