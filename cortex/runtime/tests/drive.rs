use std::sync::Arc;

use cortex_kernel::{
    handlers::goals::GoalStatus, sandbox::SandboxStatus, Action, Dispatcher, FixedClock,
    KernelConfig, SequentialIds, Syscall, TaskType,
};
use cortex_runtime::{
    DirBlobStore, Driver, DriverConfig, OracleResponse, OracleTaskExecutor, RuntimeTelemetry,
    ScriptedOracle, StateStore,
};
use serde_json::json;
use shared_event_bus::MemoryEventBus;
use tempfile::tempdir;

fn dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .config(KernelConfig::default())
        .ids(Arc::new(SequentialIds::new()))
        .clock(Arc::new(FixedClock::default()))
        .build()
}

#[tokio::test]
async fn driver_decomposes_goals_and_applies_patches() {
    let dir = tempdir().unwrap();
    let bus = Arc::new(MemoryEventBus::new(256));
    let telemetry = RuntimeTelemetry::builder("runtime")
        .log_path(dir.path().join("runtime.log"))
        .event_publisher(bus.clone())
        .build()
        .unwrap();
    let store = Arc::new(StateStore::new(
        dispatcher(),
        Arc::new(DirBlobStore::new(dir.path().join("blobs"))),
        telemetry.clone(),
    ));
    let flusher = telemetry.clone();
    let oracle = ScriptedOracle::new().respond(
        TaskType::GoalDecomposition,
        OracleResponse::text("").with_data(json!({ "subgoals": ["survey", "plan"] })),
    );
    let driver = Driver::new(
        Arc::clone(&store),
        Arc::new(OracleTaskExecutor::new(Arc::new(oracle), &KernelConfig::default())),
        DriverConfig::default(),
        telemetry,
    );

    store
        .submit(&Action::traced(
            Syscall::AddGoal {
                id: Some("g1".into()),
                parent_id: None,
                title: "explore".into(),
            },
            "t-goal",
        ))
        .unwrap();
    store
        .syscall(Syscall::ProposePatch {
            id: Some("p1".into()),
            target: "input_response".into(),
            proposed_frequency: 3,
            justification: "answer less often".into(),
        })
        .unwrap();
    store
        .syscall(Syscall::BeginSandboxTest {
            patch_id: "p1".into(),
        })
        .unwrap();

    let report = driver.run(None).await.unwrap();
    flusher.flush().await;

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);

    let state = store.current();
    let root = state.goals.get("g1").unwrap();
    assert_eq!(root.status, GoalStatus::Active);
    assert_eq!(root.children.len(), 2);
    assert_eq!(state.sandbox.status, SandboxStatus::Idle);
    assert_eq!(state.tuning.frequencies.get("input_response"), Some(&3));
    assert_eq!(state.tuning.version.to_string(), "1.0.1");
    assert_eq!(state.modifications.len(), 1);
    assert_eq!(state.snapshots.len(), 1);

    assert_eq!(bus.of_type("driver.task.completed").len(), 2);
    assert_eq!(bus.of_type("kernel.patch.applied").len(), 1);
    assert!(bus
        .of_type("driver.task.started")
        .iter()
        .any(|event| event.trace_id.as_deref() == Some("t-goal")));

    store.persist().unwrap();
    let reopened = StateStore::new(
        dispatcher(),
        Arc::new(DirBlobStore::new(dir.path().join("blobs"))),
        RuntimeTelemetry::disabled("runtime"),
    );
    assert!(reopened.restore_from_store().unwrap());
    assert_eq!(*reopened.current(), *state);
}

#[tokio::test]
async fn restored_snapshot_undoes_an_applied_patch() {
    let store = Arc::new(StateStore::new(
        dispatcher(),
        Arc::new(cortex_runtime::MemoryBlobStore::new()),
        RuntimeTelemetry::disabled("runtime"),
    ));
    let driver = Driver::new(
        Arc::clone(&store),
        Arc::new(OracleTaskExecutor::new(
            Arc::new(ScriptedOracle::new()),
            &KernelConfig::default(),
        )),
        DriverConfig::default(),
        RuntimeTelemetry::disabled("runtime"),
    );
    store
        .syscall(Syscall::ProposePatch {
            id: Some("p1".into()),
            target: "reflection".into(),
            proposed_frequency: 2,
            justification: String::new(),
        })
        .unwrap();
    store
        .syscall(Syscall::BeginSandboxTest {
            patch_id: "p1".into(),
        })
        .unwrap();
    driver.run(None).await.unwrap();

    let patched = store.current();
    assert_eq!(patched.tuning.version.to_string(), "1.0.1");
    let snapshot_id = patched.snapshots.latest().unwrap().id.clone();

    let restored = store.submit(&Action::restore(snapshot_id)).unwrap();
    assert_eq!(restored.tuning.version.to_string(), "1.0.0");
    assert_eq!(restored.tuning.frequencies.get("reflection"), Some(&20));
    assert_eq!(restored.snapshots.len(), 1);
}
