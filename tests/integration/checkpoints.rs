//! Checkpoint gating between waves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wavefront::core::{Checkpoint, CheckpointBinding, GateOutcome, QualityGate, TaskStatus, WaveStatus};
use wavefront::orchestration::{CheckpointStatus, CoordinatorConfig, PlanEvent};
use wavefront::{Error, PlanState};

use crate::fixtures::{collect_events, coordinator, index_of, registry, task, ScriptedAgent, Timeline};

fn chain(len: usize) -> Vec<wavefront::core::Task> {
    (1..=len)
        .map(|i| {
            let t = task(&format!("w{}", i), "coder");
            if i == 1 {
                t
            } else {
                t.depends_on([format!("w{}", i - 1)])
            }
        })
        .collect()
}

/// Test: A blocking failure keeps every later task out of `running`
/// Given an every-wave blocking checkpoint that requires no failed tasks
/// When a wave 1 task fails
/// Then no task of wave 2 or later ever starts
#[tokio::test(start_paused = true)]
async fn test_blocking_failure_prevents_later_waves() {
    let timeline = Timeline::new();
    let agent = ScriptedAgent::new(&timeline).fail("w1-side").build();
    let agents = registry(&["coder"], agent);
    let (mut coordinator, mut rx) = coordinator(CoordinatorConfig::default(), agents);

    let mut tasks = chain(3);
    tasks.push(task("w1-side", "coder"));
    let checkpoint = Checkpoint::new("clean", true).with_gate(QualityGate::no_failed_tasks("no-failures"));

    let report = coordinator
        .execute(tasks, &[CheckpointBinding::every_wave(checkpoint)])
        .await
        .unwrap();

    assert_eq!(report.state, PlanState::Blocked);
    assert_eq!(report.stopped_at_wave, Some(1));
    assert!(!timeline.started("w2"));
    assert!(!timeline.started("w3"));
    for wave in [2, 3] {
        assert_eq!(report.wave(wave).unwrap().status, WaveStatus::Blocked);
    }
    assert!(!report.degraded);

    let checkpoint = report.waves[0].checkpoint.as_ref().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::BlockingFailure);
    assert_eq!(checkpoint.gates[0].message, "failed tasks: w1-side");

    let events = collect_events(&mut rx);
    let failed = index_of(&events, |e| matches!(e, PlanEvent::CheckpointFailed { wave: 1, blocking: true, .. }));
    let completed = index_of(&events, |e| matches!(e, PlanEvent::PlanCompleted { state: PlanState::Blocked, .. }));
    assert!(failed < completed);
}

/// Test: Next wave waits for the checkpoint to resolve
/// Given a slow passing gate after wave 1
/// When the plan executes
/// Then wave 2 starts only after the gate finished
#[tokio::test(start_paused = true)]
async fn test_next_wave_waits_for_checkpoint() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, mut rx) = coordinator(CoordinatorConfig::default(), agents);

    let gate_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gate_runs);
    let checkpoint = Checkpoint::new("review", true).with_gate(QualityGate::from_fn("slow", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            GateOutcome::pass("looks good")
        }
    }));

    let report = coordinator
        .execute(chain(2), &[CheckpointBinding::after(1, checkpoint)])
        .await
        .unwrap();

    assert_eq!(report.state, PlanState::Completed);
    assert_eq!(gate_runs.load(Ordering::SeqCst), 1);
    let gate = &report.waves[0].checkpoint.as_ref().unwrap().gates[0];
    assert!(gate.passed);
    assert_eq!(gate.duration_ms, 30_000);
    assert!(report.waves[1].checkpoint.is_none());

    let events = collect_events(&mut rx);
    assert!(index_of(&events, |e| matches!(e, PlanEvent::WaveCompleted { wave: 1, .. }))
        < index_of(&events, |e| matches!(e, PlanEvent::WaveStarted { wave: 2, .. })));
    let wave2_start = report.waves[1].started_at.unwrap();
    let wave1_end = report.waves[0].ended_at.unwrap();
    assert!(wave2_start >= wave1_end);
}

/// Test: Non-blocking failure degrades the plan but continues
/// Given a non-blocking lint checkpoint that fails after wave 1
/// When the plan executes
/// Then wave 2 still runs, the plan completes degraded, and the gate is reported
#[tokio::test(start_paused = true)]
async fn test_non_blocking_failure_degrades() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let checkpoint = Checkpoint::new("lint", false)
        .with_gate(QualityGate::from_fn("clippy", |_| async { GateOutcome::fail("2 warnings") }))
        .with_gate(QualityGate::no_failed_tasks("clean"));

    let report = coordinator
        .execute(chain(2), &[CheckpointBinding::after(1, checkpoint)])
        .await
        .unwrap();

    assert_eq!(report.state, PlanState::Completed);
    assert!(report.degraded);
    assert_eq!(report.task_status("w2"), Some(TaskStatus::Completed));
    assert_eq!(report.failed_gates.len(), 1);
    assert_eq!(report.failed_gates[0].gate, "clippy");
    assert!(!report.failed_gates[0].blocking);
    assert_eq!(
        report.waves[0].checkpoint.as_ref().unwrap().status,
        CheckpointStatus::Warning
    );
    assert!(report.ensure_success().is_ok());
}

/// Test: Checkpoint without gates passes trivially
#[tokio::test(start_paused = true)]
async fn test_empty_checkpoint_passes() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let report = coordinator
        .execute(chain(2), &[CheckpointBinding::every_wave(Checkpoint::new("noop", true))])
        .await
        .unwrap();
    assert_eq!(report.state, PlanState::Completed);
    assert!(report
        .waves
        .iter()
        .all(|w| w.checkpoint.as_ref().is_some_and(|c| c.passed())));
}

/// Test: Wave-specific checkpoint overrides the every-wave one
#[tokio::test(start_paused = true)]
async fn test_specific_binding_wins() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let bindings = [
        CheckpointBinding::every_wave(Checkpoint::new("default", false)),
        CheckpointBinding::after(2, Checkpoint::new("release", true)),
    ];
    let report = coordinator.execute(chain(3), &bindings).await.unwrap();

    let names: Vec<&str> = report
        .waves
        .iter()
        .map(|w| w.checkpoint.as_ref().unwrap().checkpoint.as_str())
        .collect();
    assert_eq!(names, vec!["default", "release", "default"]);
}

/// Test: Binding a wave that does not exist is rejected before running
#[tokio::test(start_paused = true)]
async fn test_binding_out_of_range_rejected() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let err = coordinator
        .execute(chain(2), &[CheckpointBinding::after(5, Checkpoint::new("x", true))])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(timeline.marks().is_empty());
}

/// Test: Gate timeout counts as a gate failure
/// Given a blocking checkpoint whose gate never answers
/// When the gate timeout elapses
/// Then the plan is blocked with a timed-out gate
#[tokio::test(start_paused = true)]
async fn test_gate_timeout_blocks() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let config = CoordinatorConfig {
        gate_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let (mut coordinator, _rx) = coordinator(config, agents);

    let checkpoint = Checkpoint::new("hang", true).with_gate(QualityGate::from_fn("forever", |_| async {
        std::future::pending::<()>().await;
        GateOutcome::pass("unreachable")
    }));
    let report = coordinator
        .execute(chain(2), &[CheckpointBinding::after(1, checkpoint)])
        .await
        .unwrap();

    assert_eq!(report.state, PlanState::Blocked);
    assert!(report.failed_gates[0].message.contains("timed out"));
    assert!(!timeline.started("w2"));
}
