//! Concurrency, conflict serialization, event ordering and abort tests.

use std::time::Duration;

use wavefront::core::{TaskId, TaskStatus, WaveStatus};
use wavefront::orchestration::{
    detect_conflicts, CoordinatorConfig, PlanEvent, Resolution, RunnerConfig, TaskError,
};
use wavefront::PlanState;

use crate::fixtures::{
    collect_events, coordinator, event_names, index_of, registry, task, ScriptedAgent, Timeline,
};

fn with_ceiling(max_concurrency: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        runner: RunnerConfig {
            max_concurrency,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Test: Concurrency ceiling bounds in-flight tasks
/// Given eight independent tasks and a ceiling of three
/// When the wave runs
/// Then never more than three tasks run at once and all complete
#[tokio::test(start_paused = true)]
async fn test_ceiling_bounds_in_flight_tasks() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(with_ceiling(3), agents);

    let tasks = (0..8)
        .map(|i| task(&format!("t{}", i), "coder").with_footprint([format!("src/{}.rs", i)]))
        .collect();
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    assert_eq!(timeline.peak_concurrency(), 3);
    assert_eq!(report.waves[0].count(TaskStatus::Completed), 8);
}

/// Test: Conflict-serialized tasks follow priority, then submission order
/// Given four tasks on four agents touching the same directory
/// When the wave runs
/// Then they run one at a time by descending priority, ties in input order
#[tokio::test(start_paused = true)]
async fn test_serialized_order_is_priority_then_submission() {
    let timeline = Timeline::new();
    let agents = registry(&["a1", "a2", "a3", "a4"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let tasks = vec![
        task("low", "a1").with_priority(1).with_footprint(["src"]),
        task("tie-first", "a2").with_priority(3).with_footprint(["src/a.rs"]),
        task("high", "a3").with_priority(9).with_footprint(["src/b.rs"]),
        task("tie-second", "a4").with_priority(3).with_footprint(["src"]),
    ];
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    assert_eq!(report.state, PlanState::Completed);
    // "high" and "tie-first" touch different files but both sit under "src",
    // so only they may overlap in time; everything under "src" waits on them.
    let order = timeline.start_order();
    assert_eq!(order[0], "high");
    assert_eq!(order[1], "tie-first");
    assert_eq!(&order[2..], &["tie-second".to_string(), "low".to_string()]);
    assert!(timeline.finished_before("high", "tie-second"));
    assert!(timeline.finished_before("tie-first", "tie-second"));
    assert!(timeline.finished_before("tie-second", "low"));
}

/// Test: Conflict-free tasks are not held back by a serialized pair
/// Given X and Y sharing a file and Z on its own file
/// When the wave runs
/// Then Z runs alongside X while Y waits
#[tokio::test(start_paused = true)]
async fn test_conflict_free_task_not_blocked() {
    let timeline = Timeline::new();
    let agents = registry(&["front", "back", "docs"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let tasks = vec![
        task("x", "front").with_priority(5).with_footprint(["src/app.ts"]),
        task("y", "back").with_priority(1).with_footprint(["./src/app.ts"]),
        task("z", "docs").with_footprint(["README.md"]),
    ];
    coordinator.execute(tasks, &[]).await.unwrap();

    let order = timeline.start_order();
    assert_eq!(order, vec!["x", "z", "y"]);
    assert_eq!(timeline.peak_concurrency(), 2);
    assert!(timeline.finished_before("x", "y"));
}

/// Test: Same-agent conflicts are merged behind the earlier task
/// Given two tasks on the same agent that touch the same module
/// When the wave runs
/// Then the second is merged behind the first and runs after it
#[tokio::test(start_paused = true)]
async fn test_same_agent_conflict_merges() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let tasks = vec![
        task("models", "coder").with_priority(2).with_footprint(["src/models"]),
        task("user", "coder").with_footprint(["src/models/user.rs"]),
    ];
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    let wave = &report.waves[0];
    assert_eq!(wave.conflicts.len(), 1);
    assert_eq!(
        wave.conflicts[0].resolution,
        Some(Resolution::Merge {
            agent: "coder".to_string(),
            into: TaskId::from("models"),
        })
    );
    let user = report.task(&TaskId::from("user")).unwrap();
    assert_eq!(user.merged_into, Some(TaskId::from("models")));
    assert_eq!(user.status, TaskStatus::Completed);
    assert!(timeline.finished_before("models", "user"));
}

/// Test: A merged task only holds back the tasks it conflicts with
/// Given one agent running A (x), B (y) and a lower-priority C (x and y),
///   plus an unrelated task on another agent
/// When the wave runs
/// Then C is merged behind A, B and the unrelated task run alongside A,
///   and C starts only after both A and B finished
#[tokio::test(start_paused = true)]
async fn test_merged_task_does_not_hold_back_unrelated_work() {
    let timeline = Timeline::new();
    let agents = registry(&["p", "q"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, _rx) = coordinator(CoordinatorConfig::default(), agents);

    let tasks = vec![
        task("C", "p").with_priority(1).with_footprint(["x", "y"]),
        task("A", "p").with_priority(9).with_footprint(["x"]),
        task("B", "p").with_priority(5).with_footprint(["y"]),
        task("D", "q").with_priority(3).with_footprint(["z"]),
    ];
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    assert_eq!(report.state, PlanState::Completed);
    assert_eq!(timeline.peak_concurrency(), 3);
    assert_eq!(timeline.start_order().last().map(String::as_str), Some("C"));
    assert!(!timeline.finished_before("A", "B"));
    assert!(timeline.finished_before("A", "C"));
    assert!(timeline.finished_before("B", "C"));

    let wave = &report.waves[0];
    assert_eq!(wave.conflicts.len(), 1);
    assert_eq!(wave.conflicts[0].candidate, TaskId::from("C"));
    assert!(wave.conflicts[0].is_merge());
    let merged = report.task(&TaskId::from("C")).unwrap();
    assert_eq!(merged.merged_into, Some(TaskId::from("A")));
    assert_eq!(merged.status, TaskStatus::Completed);
}

/// Test: Conflict detection is symmetric in overlap and stable across calls
/// Given tasks whose footprints overlap by directory containment
/// When detection runs repeatedly in either direction
/// Then both directions report a match and results do not change
#[test]
fn test_detection_properties() {
    let parent = task("parent", "a").with_footprint(["src/api"]);
    let child = task("child", "b").with_footprint(["src/api/routes.rs"]);
    let other = task("other", "c").with_footprint(["src/apiary.rs"]);

    assert!(detect_conflicts(&parent, &[&child]).has_conflict());
    assert!(detect_conflicts(&child, &[&parent]).has_conflict());
    assert!(!detect_conflicts(&other, &[&parent, &child]).has_conflict());
    assert_eq!(
        detect_conflicts(&child, &[&parent, &other]),
        detect_conflicts(&child, &[&other, &parent])
    );
}

/// Test: Events arrive in lifecycle order
/// Given a two-wave plan
/// When it executes
/// Then plan_started comes first, waves open and close in order, and plan_completed is last
#[tokio::test(start_paused = true)]
async fn test_event_order() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut coordinator, mut rx) = coordinator(CoordinatorConfig::default(), agents);

    let tasks = vec![task("a", "coder"), task("b", "coder").depends_on(["a"])];
    coordinator.execute(tasks, &[]).await.unwrap();
    let events = collect_events(&mut rx);

    assert_eq!(
        event_names(&events),
        vec![
            "plan_started",
            "wave_started",
            "task_started",
            "task_completed",
            "wave_completed",
            "wave_started",
            "task_started",
            "task_completed",
            "wave_completed",
            "plan_completed",
        ]
    );
    let wave1_done = index_of(&events, |e| matches!(e, PlanEvent::WaveCompleted { wave: 1, .. }));
    let b_started = index_of(&events, |e| {
        matches!(e, PlanEvent::TaskStarted { task_id, .. } if task_id.as_str() == "b")
    });
    assert!(wave1_done < b_started);
    assert!(events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
}

/// Test: Hard abort mid-wave
/// Given a running wave with one task in flight and one waiting, plus a second wave
/// When the plan is aborted
/// Then the in-flight task is best-effort cancelled, the rest are skipped, plan FAILED
#[tokio::test(start_paused = true)]
async fn test_abort_mid_wave() {
    let timeline = Timeline::new();
    let agent = ScriptedAgent::new(&timeline)
        .default_delay(Duration::from_secs(300))
        .build();
    let agents = registry(&["coder"], agent);
    let (mut coordinator, mut rx) = coordinator(with_ceiling(1), agents);

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });

    let tasks = vec![
        task("first", "coder").with_priority(2).with_footprint(["a"]),
        task("second", "coder").with_footprint(["b"]),
        task("later", "coder").depends_on(["first"]),
    ];
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    assert_eq!(report.state, PlanState::Failed);
    assert_eq!(report.stopped_at_wave, Some(1));
    assert_eq!(report.waves[0].status, WaveStatus::Failed);
    assert_eq!(report.waves[1].status, WaveStatus::Blocked);

    let first = report.task(&TaskId::from("first")).unwrap();
    assert_eq!(first.status, TaskStatus::Skipped);
    assert!(first.cancelled);
    assert_eq!(first.error, Some(TaskError::Cancelled));

    let second = report.task(&TaskId::from("second")).unwrap();
    assert_eq!(second.status, TaskStatus::Skipped);
    assert!(!second.cancelled);
    assert!(!timeline.started("second"));

    assert_eq!(report.task_status("later"), Some(TaskStatus::Skipped));
    assert!(report.ensure_success().is_err());

    let events = collect_events(&mut rx);
    assert_eq!(event_names(&events).last(), Some(&"plan_completed"));
}

/// Test: Fail-fast stops the plan
/// Given a fail-fast plan whose critical task fails in wave 1
/// When the plan executes
/// Then unstarted wave 1 tasks are cancelled, wave 2 is blocked, plan FAILED
#[tokio::test(start_paused = true)]
async fn test_fail_fast_critical_failure() {
    let timeline = Timeline::new();
    let agent = ScriptedAgent::new(&timeline).fail("migrate").build();
    let agents = registry(&["coder"], agent);
    let config = CoordinatorConfig {
        runner: RunnerConfig {
            max_concurrency: 1,
            fail_fast: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut coordinator, _rx) = coordinator(config, agents);

    let tasks = vec![
        task("migrate", "coder").critical().with_priority(10),
        task("seed", "coder"),
        task("serve", "coder").depends_on(["seed"]),
    ];
    let report = coordinator.execute(tasks, &[]).await.unwrap();

    assert_eq!(report.state, PlanState::Failed);
    assert_eq!(report.stopped_at_wave, Some(1));
    assert_eq!(report.task_status("migrate"), Some(TaskStatus::Failed));
    assert_eq!(
        report.task(&TaskId::from("seed")).unwrap().error,
        Some(TaskError::FailFast {
            trigger: TaskId::from("migrate")
        })
    );
    assert_eq!(
        report.task(&TaskId::from("serve")).unwrap().error,
        Some(TaskError::Blocked { wave: 1 })
    );
    assert!(!timeline.started("seed"));
}

/// Test: Plans are isolated from each other
/// Given two coordinators whose tasks declare the same resources
/// When both plans run at the same time
/// Then neither sees the other's tasks as conflicts
#[tokio::test(start_paused = true)]
async fn test_parallel_plans_do_not_interfere() {
    let timeline = Timeline::new();
    let agents = registry(&["coder"], ScriptedAgent::new(&timeline).build());
    let (mut left, _lrx) = coordinator(CoordinatorConfig::default(), agents.clone());
    let (mut right, _rrx) = coordinator(CoordinatorConfig::default(), agents);

    let (l, r) = tokio::join!(
        left.execute(vec![task("l", "coder").with_footprint(["shared.txt"])], &[]),
        right.execute(vec![task("r", "coder").with_footprint(["shared.txt"])], &[]),
    );
    let (l, r) = (l.unwrap(), r.unwrap());

    assert!(l.waves[0].conflicts.is_empty());
    assert!(r.waves[0].conflicts.is_empty());
    assert_ne!(l.plan_id, r.plan_id);
    assert_eq!(timeline.peak_concurrency(), 2);
}
