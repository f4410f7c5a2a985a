use std::sync::Arc;

use cortex_kernel::{
    Action, Command, Dispatcher, FixedClock, KernelConfig, SequentialIds, Syscall, WorldState,
};
use serde_json::json;

fn dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .config(KernelConfig::default())
        .ids(Arc::new(SequentialIds::new()))
        .clock(Arc::new(FixedClock::default()))
        .build()
}

const JOURNAL: &str = r#"
{"type":"SYSCALL","payload":{"call":"ADD_GOAL","args":{"id":"g1","title":"map the room"},"traceId":"t-1"}}
{"type":"SYSCALL","payload":{"call":"ADD_GOAL","args":{"id":"g2","parentId":"g1","title":"find the door"}}}
{"type":"SYSCALL","payload":{"call":"ADD_MEMORY","args":{"content":"door is north","importance":"high","tags":["room"]}}}
{"type":"SYSCALL","payload":{"call":"PROPOSE_PATCH","args":{"id":"p1","target":"reflection","proposedFrequency":12}}}
{"type":"SYSCALL","payload":{"call":"BEGIN_SANDBOX_TEST","args":{"patchId":"p1"}}}
{"type":"SYSCALL","payload":{"call":"CONCLUDE_SANDBOX_TEST","args":{"passed":true,"reason":"stable"}}}
{"type":"SYSCALL","payload":{"call":"APPLY_PATCH"}}
{"type":"SYSCALL","payload":{"call":"TICK","args":null}}
{"type":"SYSCALL","payload":{"call":"SUMMON_DRAGON","args":{"color":"red"}}}
"#;

fn parse_journal(raw: &str) -> Vec<Action> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("journal line"))
        .collect()
}

#[test]
fn journal_replays_into_expected_state() {
    let dispatcher = dispatcher();
    let actions = parse_journal(JOURNAL);
    let state = dispatcher
        .replay(&dispatcher.initial_state(), &actions)
        .unwrap();

    assert_eq!(state.goals.goals.len(), 2);
    assert_eq!(state.goals.get("g1").unwrap().children, vec!["g2"]);
    assert_eq!(state.memory.entries.len(), 1);
    assert_eq!(state.tuning.frequencies.get("reflection"), Some(&12));
    assert_eq!(state.tuning.version.to_string(), "1.0.1");
    assert_eq!(state.kernel.tick, 1);
    assert_eq!(state.kernel.queue[0].trace_id.as_deref(), Some("t-1"));
}

#[test]
fn populated_state_survives_export_and_import() {
    let dispatcher = dispatcher();
    let state = dispatcher
        .replay(&dispatcher.initial_state(), &parse_journal(JOURNAL))
        .unwrap();

    let exported = serde_json::to_string(&Action::ImportState(Box::new(WorldState::clone(&state))))
        .unwrap();
    let action: Action = serde_json::from_str(&exported).unwrap();
    let imported = dispatcher
        .dispatch(&dispatcher.initial_state(), &action)
        .unwrap();
    assert_eq!(*imported, *state);
    assert_eq!(imported.snapshots.len(), 1);
    assert!(imported.snapshots.latest().unwrap().state.snapshots.is_empty());
}

#[test]
fn syscalls_serialize_back_to_wire_shape() {
    let action = Action::Syscall(
        Command::new(Syscall::ProposePatch {
            id: Some("p9".into()),
            target: "memory_consolidation".into(),
            proposed_frequency: 40,
            justification: String::new(),
        })
        .traced("t-2"),
    );
    let value = serde_json::to_value(&action).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "SYSCALL",
            "payload": {
                "call": "PROPOSE_PATCH",
                "args": {
                    "id": "p9",
                    "target": "memory_consolidation",
                    "proposedFrequency": 40,
                    "justification": ""
                },
                "traceId": "t-2"
            }
        })
    );
    let reset = serde_json::to_value(&Action::ResetState).unwrap();
    assert_eq!(reset, json!({ "type": "RESET_STATE" }));
}

#[test]
fn huge_wire_interval_saturates_the_cooldown() {
    let dispatcher = dispatcher();
    let actions: Vec<Action> = [
        json!({ "call": "PROPOSE_PATCH", "args": { "id": "p1", "target": "reflection", "proposedFrequency": u64::MAX } }),
        json!({ "call": "BEGIN_SANDBOX_TEST", "args": { "patchId": "p1" } }),
        json!({ "call": "CONCLUDE_SANDBOX_TEST", "args": { "passed": true, "reason": "ok" } }),
        json!({ "call": "APPLY_PATCH" }),
        json!({ "call": "TICK" }),
        json!({ "call": "ENQUEUE_TASK", "args": { "task": { "type": "reflection", "topic": "self" }, "id": "r1" } }),
        json!({ "call": "SET_RUNNING", "args": { "taskId": "r1" } }),
        json!({ "call": "COMPLETE_TASK", "args": { "taskId": "r1" } }),
        json!({ "call": "RECORD_COPROCESSOR_RUN", "args": { "coprocessor": "reflection" } }),
    ]
    .into_iter()
    .map(|payload| {
        serde_json::from_value(json!({ "type": "SYSCALL", "payload": payload })).unwrap()
    })
    .collect();

    let state = dispatcher
        .replay(&dispatcher.initial_state(), &actions)
        .unwrap();
    assert_eq!(state.tuning.frequencies.get("reflection"), Some(&u64::MAX));
    assert!(state.kernel.running.is_none());
    assert_eq!(state.kernel.cooldowns.get("reflection"), Some(&u64::MAX));
    assert!(!state.kernel.is_eligible("reflection"));
}
