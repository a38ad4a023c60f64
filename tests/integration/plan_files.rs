//! Plan files driving real command agents and command gates.
//!
//! These spawn `sh`, so they only run on unix.

#![cfg(unix)]

use std::fs;

use tempfile::TempDir;

use wavefront::config::Config;
use wavefront::core::TaskStatus;
use wavefront::orchestration::{CheckpointValidator, CoordinatorConfig, PlanCoordinator};
use wavefront::plan::Plan;
use wavefront::PlanState;

const PLAN: &str = r#"
[agents.writer]
command = "sh"
args = ["-c", "cat > \"$WAVEFRONT_TASK_ID.json\"; echo wrote $WAVEFRONT_TASK_ID"]

[agents.broken]
command = "sh"
args = ["-c", "echo 'cannot compile' >&2; exit 1"]

[[tasks]]
id = "schema"
agent = "writer"
resourceFootprint = ["db/schema.sql"]
estimatedDurationMinutes = 5

[[tasks]]
id = "api"
agent = "writer"
dependsOn = ["schema"]
resourceFootprint = ["src/api"]

[[checkpoints]]
name = "artifacts"
blocking = true
afterWave = 1

[[checkpoints.gates]]
name = "schema-written"
command = "test -f schema.json"
"#;

/// Test: TOML plan runs end to end through command agents
/// Given a plan whose agents write one file per task
/// When the plan executes from its own directory
/// Then every task completes, the gate sees the written file, and outputs are captured
#[tokio::test]
async fn test_toml_plan_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.toml");
    fs::write(&path, PLAN).unwrap();

    let plan = Plan::load(&path).unwrap();
    assert!(plan.missing_agents().is_empty());
    let validator = CheckpointValidator::from_config(&Config::default())
        .with_workdir(dir.path().to_path_buf());
    let mut coordinator = PlanCoordinator::new(CoordinatorConfig::default(), plan.agents)
        .with_validator(validator);

    let report = coordinator.execute(plan.tasks, &plan.checkpoints).await.unwrap();

    assert_eq!(report.state, PlanState::Completed, "{}", report.to_json_pretty().unwrap());
    assert!(dir.path().join("schema.json").exists());
    assert!(dir.path().join("api.json").exists());
    let api = report.task(&"api".into()).unwrap();
    assert_eq!(api.output.as_deref(), Some("wrote api"));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("schema.json")).unwrap()).unwrap();
    assert_eq!(written["id"], "schema");
    assert_eq!(written["resourceFootprint"][0], "db/schema.sql");
}

/// Test: Failing command agent surfaces stderr
/// Given a task on an agent that exits non-zero
/// When the plan executes
/// Then the task fails with the agent's stderr and the plan completes degraded
#[tokio::test]
async fn test_failing_command_agent() {
    let plan = Plan::from_toml_str(&format!(
        "{}\n[[tasks]]\nid = \"bad\"\nagent = \"broken\"\n",
        PLAN.split("[[tasks]]").next().unwrap()
    ))
    .unwrap();
    let mut coordinator = PlanCoordinator::new(CoordinatorConfig::default(), plan.agents);

    let report = coordinator.execute(plan.tasks, &[]).await.unwrap();

    assert_eq!(report.state, PlanState::Completed);
    assert!(report.degraded);
    let bad = report.task(&"bad".into()).unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(
        bad.error.as_ref().map(|e| e.to_string()),
        Some("agent reported failure: cannot compile".to_string())
    );
}
