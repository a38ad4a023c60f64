use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use wavefront::config::Config;
use wavefront::core::{build_waves, Task};
use wavefront::orchestration::{
    detect_conflicts, CheckpointValidator, ConflictDetection, CoordinatorConfig, PlanCoordinator,
};
use wavefront::plan::Plan;
use wavefront::{wlog, wlog_warn, Result};

/// Wavefront - dependency-ordered, conflict-aware parallel task runner
#[derive(Parser, Debug)]
#[command(name = "wavefront")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WAVEFRONT_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.wavefront/wavefront.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a plan file and print the plan report as JSON
    Run {
        /// Plan file (.toml or .json)
        plan: PathBuf,

        /// Maximum tasks in flight per wave
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Per-attempt task timeout in seconds
        #[arg(long)]
        task_timeout: Option<u64>,

        /// Cancel unstarted tasks when a critical task fails
        #[arg(long)]
        fail_fast: bool,

        /// Stream events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Print the computed waves
    Waves {
        /// Plan file (.toml or .json)
        plan: PathBuf,
    },

    /// Print resource conflicts between tasks that share a wave
    Conflicts {
        /// Plan file (.toml or .json)
        plan: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOptions {
    max_concurrency: Option<usize>,
    task_timeout: Option<u64>,
    fail_fast: bool,
    events: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(secs) = self.task_timeout {
            config.task_timeout_secs = secs;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    wavefront::log::init_with_debug(cli.debug);

    let outcome = match cli.command {
        Command::Run {
            plan,
            max_concurrency,
            task_timeout,
            fail_fast,
            events,
        } => run_plan(
            &plan,
            RunOptions {
                max_concurrency,
                task_timeout,
                fail_fast,
                events,
            },
        ),
        Command::Waves { plan } => print_waves(&plan).map(|_| ExitCode::SUCCESS),
        Command::Conflicts { plan } => print_conflicts(&plan).map(|_| ExitCode::SUCCESS),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("wavefront: {}", e);
            ExitCode::from(2)
        }
    }
}

fn run_plan(path: &Path, options: RunOptions) -> Result<ExitCode> {
    let mut config = Config::load()?;
    options.apply(&mut config);
    config.validate()?;

    let plan = Plan::load(path)?;
    for name in plan.missing_agents() {
        eprintln!("wavefront: warning: agent {} is not on PATH", name);
    }
    wlog!(
        "Run command: plan={}, max_concurrency={}, task_timeout_secs={}, fail_fast={}",
        path.display(),
        config.max_concurrency,
        config.task_timeout_secs,
        config.fail_fast
    );

    let mut validator = CheckpointValidator::from_config(&config);
    if let Some(dir) = &plan.base_dir {
        validator = validator.with_workdir(dir.clone());
    }
    let Plan {
        tasks,
        agents,
        checkpoints,
        ..
    } = plan;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let mut coordinator =
            PlanCoordinator::new(CoordinatorConfig::from_config(&config), agents).with_validator(validator);

        let printer = options.events.then(|| {
            let mut rx = coordinator.subscribe();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Ok(line) = serde_json::to_string(&event) {
                        eprintln!("{}", line);
                    }
                }
            })
        });

        let cancel = coordinator.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                wlog_warn!("Interrupted, aborting plan");
                cancel.cancel();
            }
        });

        let report = coordinator.execute(tasks, &checkpoints).await;
        // Closing the event channel lets the printer drain and exit.
        drop(coordinator);
        if let Some(handle) = printer {
            let _ = handle.await;
        }
        report
    })?;

    println!("{}", report.to_json_pretty()?);
    match report.ensure_success() {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("wavefront: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_waves(path: &Path) -> Result<()> {
    let plan = Plan::load(path)?;
    let mut waves = build_waves(plan.tasks)?;
    waves.attach_checkpoints(&plan.checkpoints)?;
    println!("{}", serde_json::to_string_pretty(waves.waves())?);
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaveConflict {
    wave: u32,
    #[serde(flatten)]
    detection: ConflictDetection,
}

/// Conflicts each task has with the tasks ahead of it in its wave.
fn static_conflicts(tasks: Vec<Task>) -> Result<Vec<WaveConflict>> {
    let plan = build_waves(tasks)?;
    let mut found = Vec::new();
    for wave in plan.waves() {
        let members = plan.wave_tasks(wave.number);
        for (i, task) in members.iter().enumerate() {
            let detection = detect_conflicts(task, &members[..i]);
            if detection.has_conflict() {
                found.push(WaveConflict {
                    wave: wave.number,
                    detection,
                });
            }
        }
    }
    Ok(found)
}

fn print_conflicts(path: &Path) -> Result<()> {
    let plan = Plan::load(path)?;
    let conflicts = static_conflicts(plan.tasks)?;
    println!("{}", serde_json::to_string_pretty(&conflicts)?);
    Ok(())
}
