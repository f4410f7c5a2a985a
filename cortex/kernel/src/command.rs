//! Commands: the only shape in which a state change can be requested.
//!
//! On the wire a command is `{ "call": "ENQUEUE_TASK", "args": {..}, "traceId": ".." }`.
//! Inside the kernel the call and its arguments are decoded once into the
//! closed [`Syscall`] enum; anything that fails to decode becomes
//! [`Syscall::Unrecognized`], which no reducer handles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    handlers::{activity::ActivityLevel, goals::GoalStatus, memory::MemoryImportance},
    scheduler::TaskKind,
    state::{StateKey, WorldState},
};

/// Every syscall the kernel understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Syscall {
    /// Queue a task unless one of the same type is queued or running.
    EnqueueTask {
        /// Task type and payload.
        task: TaskKind,
        /// Explicit task id; derived from the dispatch id when absent.
        #[serde(default)]
        id: Option<String>,
    },
    /// Move a queued task into the running slot.
    #[serde(rename_all = "camelCase")]
    SetRunning {
        /// Id of the queued task.
        task_id: String,
    },
    /// Report successful completion of the running task.
    #[serde(rename_all = "camelCase")]
    CompleteTask {
        /// Id of the running task.
        task_id: String,
        /// Short outcome description.
        #[serde(default)]
        summary: Option<String>,
    },
    /// Report failure of the running task. No retry is scheduled.
    #[serde(rename_all = "camelCase")]
    FailTask {
        /// Id of the running task.
        task_id: String,
        /// Failure reason.
        #[serde(default)]
        reason: String,
    },
    /// Advance the tick counter by one.
    Tick {},
    /// Drop every queued task.
    ClearQueue {},
    /// Start the cooldown of a coprocessor that just ran.
    RecordCoprocessorRun {
        /// Coprocessor key in the cooldown table.
        coprocessor: String,
    },
    /// Record a proposed change to the live frequency table.
    #[serde(rename_all = "camelCase")]
    ProposePatch {
        /// Explicit proposal id; derived from the dispatch id when absent.
        #[serde(default)]
        id: Option<String>,
        /// Task type or coprocessor key whose interval changes.
        target: String,
        /// Proposed interval in ticks.
        proposed_frequency: u64,
        /// Why the change is wanted.
        #[serde(default)]
        justification: String,
    },
    /// Start testing a proposal.
    #[serde(rename_all = "camelCase")]
    BeginSandboxTest {
        /// Proposal under test.
        patch_id: String,
    },
    /// Record the verdict of the running sandbox test.
    ConcludeSandboxTest {
        /// Whether validation passed.
        passed: bool,
        /// Verdict explanation.
        #[serde(default)]
        reason: String,
    },
    /// Install a passed proposal into the live frequency table.
    ApplyPatch {},
    /// Leave a concluded test without applying it.
    ResetSandbox {},
    /// Store a copy of the current state in the snapshot ring.
    TakeSnapshot {
        /// Why the snapshot was taken.
        #[serde(default)]
        reason: String,
    },
    /// Submit a structural change for review.
    SubmitArchitectureProposal {
        /// Explicit proposal id; derived from the dispatch id when absent.
        #[serde(default)]
        id: Option<String>,
        /// Short title.
        title: String,
        /// Longer description.
        #[serde(default)]
        description: String,
        /// Free-form category.
        #[serde(default)]
        category: String,
    },
    /// Mark a pending architecture proposal as implemented.
    #[serde(rename_all = "camelCase")]
    ImplementArchitectureProposal {
        /// Proposal to implement.
        proposal_id: String,
    },
    /// Mark a pending architecture proposal as rejected.
    #[serde(rename_all = "camelCase")]
    RejectArchitectureProposal {
        /// Proposal to reject.
        proposal_id: String,
        /// Rejection note.
        #[serde(default)]
        reason: String,
    },
    /// Append to the activity log.
    AddLog {
        /// Entry level.
        #[serde(default)]
        level: ActivityLevel,
        /// Component that produced the entry.
        #[serde(default)]
        source: String,
        /// Entry text.
        message: String,
    },
    /// Accept external input for the agent to respond to.
    ReceiveInput {
        /// Input text.
        text: String,
    },
    /// Ask the agent to reflect on a topic.
    RequestReflection {
        /// Topic to reflect on.
        #[serde(default)]
        topic: String,
    },
    /// Empty the activity log.
    ClearLogs {},
    /// Add a goal, optionally under a parent.
    #[serde(rename_all = "camelCase")]
    AddGoal {
        /// Explicit goal id; derived from the dispatch id when absent.
        #[serde(default)]
        id: Option<String>,
        /// Parent goal id; a root goal when absent.
        #[serde(default)]
        parent_id: Option<String>,
        /// Goal title.
        title: String,
    },
    /// Change a goal's status.
    #[serde(rename_all = "camelCase")]
    SetGoalStatus {
        /// Goal to update.
        goal_id: String,
        /// New status.
        status: GoalStatus,
    },
    /// Remove a goal and its subtree.
    #[serde(rename_all = "camelCase")]
    RemoveGoal {
        /// Goal to remove.
        goal_id: String,
    },
    /// Store a memory.
    AddMemory {
        /// Memory text.
        content: String,
        /// Retention importance.
        #[serde(default)]
        importance: MemoryImportance,
        /// Search tags.
        #[serde(default)]
        tags: Vec<String>,
    },
    /// Remove a memory by id.
    #[serde(rename_all = "camelCase")]
    ForgetMemory {
        /// Memory to remove.
        memory_id: String,
    },
    /// Drop low-importance memories down to a floor.
    #[serde(rename_all = "camelCase")]
    ConsolidateMemory {
        /// Never shrink below this many entries.
        #[serde(default)]
        keep_at_least: usize,
    },
    /// Set the persona's mood.
    SetMood {
        /// New mood.
        mood: String,
    },
    /// Set a persona trait in `0.0..=1.0`.
    SetTrait {
        /// Trait name.
        name: String,
        /// Trait value; clamped.
        value: f32,
    },
    /// Rename the persona.
    RenamePersona {
        /// New name.
        name: String,
    },
    /// Register a plugin (enabled).
    RegisterPlugin {
        /// Plugin id.
        id: String,
        /// Display name.
        name: String,
        /// Description.
        #[serde(default)]
        description: String,
    },
    /// Enable or disable a plugin.
    #[serde(rename_all = "camelCase")]
    SetPluginEnabled {
        /// Plugin id.
        plugin_id: String,
        /// Desired state.
        enabled: bool,
    },
    /// Remove a plugin.
    #[serde(rename_all = "camelCase")]
    UnregisterPlugin {
        /// Plugin id.
        plugin_id: String,
    },
    /// A call no reducer understands, kept verbatim.
    #[serde(skip)]
    Unrecognized {
        /// Wire call name.
        call: String,
        /// Raw arguments.
        args: Value,
    },
}

impl Syscall {
    /// Wire name of the call.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::EnqueueTask { .. } => "ENQUEUE_TASK",
            Self::SetRunning { .. } => "SET_RUNNING",
            Self::CompleteTask { .. } => "COMPLETE_TASK",
            Self::FailTask { .. } => "FAIL_TASK",
            Self::Tick {} => "TICK",
            Self::ClearQueue {} => "CLEAR_QUEUE",
            Self::RecordCoprocessorRun { .. } => "RECORD_COPROCESSOR_RUN",
            Self::ProposePatch { .. } => "PROPOSE_PATCH",
            Self::BeginSandboxTest { .. } => "BEGIN_SANDBOX_TEST",
            Self::ConcludeSandboxTest { .. } => "CONCLUDE_SANDBOX_TEST",
            Self::ApplyPatch {} => "APPLY_PATCH",
            Self::ResetSandbox {} => "RESET_SANDBOX",
            Self::TakeSnapshot { .. } => "TAKE_SNAPSHOT",
            Self::SubmitArchitectureProposal { .. } => "SUBMIT_ARCHITECTURE_PROPOSAL",
            Self::ImplementArchitectureProposal { .. } => "IMPLEMENT_ARCHITECTURE_PROPOSAL",
            Self::RejectArchitectureProposal { .. } => "REJECT_ARCHITECTURE_PROPOSAL",
            Self::AddLog { .. } => "ADD_LOG",
            Self::ReceiveInput { .. } => "RECEIVE_INPUT",
            Self::RequestReflection { .. } => "REQUEST_REFLECTION",
            Self::ClearLogs {} => "CLEAR_LOGS",
            Self::AddGoal { .. } => "ADD_GOAL",
            Self::SetGoalStatus { .. } => "SET_GOAL_STATUS",
            Self::RemoveGoal { .. } => "REMOVE_GOAL",
            Self::AddMemory { .. } => "ADD_MEMORY",
            Self::ForgetMemory { .. } => "FORGET_MEMORY",
            Self::ConsolidateMemory { .. } => "CONSOLIDATE_MEMORY",
            Self::SetMood { .. } => "SET_MOOD",
            Self::SetTrait { .. } => "SET_TRAIT",
            Self::RenamePersona { .. } => "RENAME_PERSONA",
            Self::RegisterPlugin { .. } => "REGISTER_PLUGIN",
            Self::SetPluginEnabled { .. } => "SET_PLUGIN_ENABLED",
            Self::UnregisterPlugin { .. } => "UNREGISTER_PLUGIN",
            Self::Unrecognized { call, .. } => call,
        }
    }

    /// Sub-record the call is primarily about. Other reducers may still react
    /// (the scheduler enqueues follow-up work, the snapshot ring captures state
    /// before architecture changes).
    #[must_use]
    pub const fn primary_domain(&self) -> Option<StateKey> {
        match self {
            Self::EnqueueTask { .. }
            | Self::SetRunning { .. }
            | Self::CompleteTask { .. }
            | Self::FailTask { .. }
            | Self::Tick {}
            | Self::ClearQueue {}
            | Self::RecordCoprocessorRun { .. } => Some(StateKey::Kernel),
            Self::ProposePatch { .. }
            | Self::BeginSandboxTest { .. }
            | Self::ConcludeSandboxTest { .. }
            | Self::ResetSandbox {} => Some(StateKey::Sandbox),
            Self::ApplyPatch {} => Some(StateKey::Tuning),
            Self::TakeSnapshot { .. } => Some(StateKey::Snapshots),
            Self::SubmitArchitectureProposal { .. }
            | Self::ImplementArchitectureProposal { .. }
            | Self::RejectArchitectureProposal { .. } => Some(StateKey::Architecture),
            Self::AddLog { .. }
            | Self::ReceiveInput { .. }
            | Self::RequestReflection { .. }
            | Self::ClearLogs {} => Some(StateKey::Activity),
            Self::AddGoal { .. } | Self::SetGoalStatus { .. } | Self::RemoveGoal { .. } => {
                Some(StateKey::Goals)
            }
            Self::AddMemory { .. } | Self::ForgetMemory { .. } | Self::ConsolidateMemory { .. } => {
                Some(StateKey::Memory)
            }
            Self::SetMood { .. } | Self::SetTrait { .. } | Self::RenamePersona { .. } => {
                Some(StateKey::Persona)
            }
            Self::RegisterPlugin { .. }
            | Self::SetPluginEnabled { .. }
            | Self::UnregisterPlugin { .. } => Some(StateKey::Plugins),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Wraps the syscall in an untraced command.
    #[must_use]
    pub fn into_command(self) -> Command {
        Command::new(self)
    }
}

/// A syscall plus its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireCommand", into = "WireCommand")]
pub struct Command {
    /// Decoded call.
    pub syscall: Syscall,
    /// Correlation id propagated into tasks and log entries.
    pub trace_id: Option<String>,
}

impl Command {
    /// Creates an untraced command.
    #[must_use]
    pub const fn new(syscall: Syscall) -> Self {
        Self {
            syscall,
            trace_id: None,
        }
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn traced(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Wire name of the call.
    #[must_use]
    pub fn name(&self) -> &str {
        self.syscall.name()
    }
}

impl From<Syscall> for Command {
    fn from(syscall: Syscall) -> Self {
        Self::new(syscall)
    }
}

/// Command as it appears in journals and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCommand {
    /// Call name.
    pub call: String,
    /// Argument bag.
    #[serde(default)]
    pub args: Value,
    /// Correlation id.
    #[serde(default, rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl From<WireCommand> for Command {
    fn from(wire: WireCommand) -> Self {
        let args = match wire.args {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let mut tagged = Map::new();
        tagged.insert("call".into(), Value::String(wire.call.clone()));
        tagged.insert("args".into(), args.clone());
        let syscall = serde_json::from_value(Value::Object(tagged)).unwrap_or_else(|err| {
            tracing::debug!(call = %wire.call, error = %err, "syscall did not decode");
            Syscall::Unrecognized {
                call: wire.call,
                args,
            }
        });
        Self {
            syscall,
            trace_id: wire.trace_id,
        }
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        let trace_id = command.trace_id;
        if let Syscall::Unrecognized { call, args } = command.syscall {
            return Self {
                call,
                args,
                trace_id,
            };
        }
        let call = command.syscall.name().to_string();
        let args = match serde_json::to_value(&command.syscall) {
            Ok(Value::Object(mut map)) => map.remove("args").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self {
            call,
            args,
            trace_id,
        }
    }
}

/// Payload of [`Action::RestoreSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreTarget {
    /// Snapshot to restore.
    pub snapshot_id: String,
}

/// Top-level request accepted by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Route a command through every registered reducer.
    Syscall(Command),
    /// Replace the state verbatim, bypassing the reducers.
    ImportState(Box<WorldState>),
    /// Rebuild the documented initial state, bypassing the reducers.
    ResetState,
    /// Replace every sub-record with a snapshot's copy, keeping the snapshot ring.
    RestoreSnapshot(RestoreTarget),
}

impl Action {
    /// Wraps a syscall without a trace id.
    #[must_use]
    pub const fn syscall(syscall: Syscall) -> Self {
        Self::Syscall(Command::new(syscall))
    }

    /// Wraps a syscall with a trace id.
    #[must_use]
    pub fn traced(syscall: Syscall, trace_id: impl Into<String>) -> Self {
        Self::Syscall(Command::new(syscall).traced(trace_id))
    }

    /// Restore request for `snapshot_id`.
    #[must_use]
    pub fn restore(snapshot_id: impl Into<String>) -> Self {
        Self::RestoreSnapshot(RestoreTarget {
            snapshot_id: snapshot_id.into(),
        })
    }

    /// Name used in logs: the call name for syscalls, the action type otherwise.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Syscall(command) => command.name(),
            Self::ImportState(_) => "IMPORT_STATE",
            Self::ResetState => "RESET_STATE",
            Self::RestoreSnapshot(_) => "RESTORE_SNAPSHOT",
        }
    }
}

impl From<Syscall> for Action {
    fn from(syscall: Syscall) -> Self {
        Self::syscall(syscall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_syscall() {
        let action: Action = serde_json::from_value(json!({
            "type": "SYSCALL",
            "payload": {
                "call": "ENQUEUE_TASK",
                "args": { "task": { "type": "goal_decomposition", "goal_id": "g-1" } },
                "traceId": "t-9"
            }
        }))
        .unwrap();
        let Action::Syscall(command) = action else {
            panic!("expected syscall");
        };
        assert_eq!(command.trace_id.as_deref(), Some("t-9"));
        assert_eq!(
            command.syscall,
            Syscall::EnqueueTask {
                task: TaskKind::GoalDecomposition {
                    goal_id: "g-1".into()
                },
                id: None,
            }
        );
    }

    #[test]
    fn argumentless_calls_accept_missing_args() {
        let command: Command = serde_json::from_value(json!({ "call": "TICK" })).unwrap();
        assert_eq!(command.syscall, Syscall::Tick {});
    }

    #[test]
    fn unknown_call_is_kept_verbatim() {
        let command: Command =
            serde_json::from_value(json!({ "call": "DANCE", "args": { "style": "waltz" } }))
                .unwrap();
        assert_eq!(command.name(), "DANCE");
        assert_eq!(command.syscall.primary_domain(), None);
        let wire = serde_json::to_value(&command).unwrap();
        assert_eq!(wire, json!({ "call": "DANCE", "args": { "style": "waltz" } }));
    }

    #[test]
    fn malformed_arguments_become_unrecognized() {
        let command: Command = serde_json::from_value(json!({
            "call": "SET_RUNNING",
            "args": { "taskId": 42 }
        }))
        .unwrap();
        assert!(matches!(command.syscall, Syscall::Unrecognized { .. }));
    }

    #[test]
    fn camel_case_arguments_round_trip() {
        let command = Command::new(Syscall::BeginSandboxTest {
            patch_id: "p1".into(),
        })
        .traced("t-1");
        let wire = serde_json::to_value(&command).unwrap();
        assert_eq!(
            wire,
            json!({ "call": "BEGIN_SANDBOX_TEST", "args": { "patchId": "p1" }, "traceId": "t-1" })
        );
        let back: Command = serde_json::from_value(wire).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn bypass_actions_use_type_tags() {
        let reset: Action = serde_json::from_value(json!({ "type": "RESET_STATE" })).unwrap();
        assert_eq!(reset, Action::ResetState);
        let restore: Action = serde_json::from_value(json!({
            "type": "RESTORE_SNAPSHOT",
            "payload": { "snapshotId": "snap-1" }
        }))
        .unwrap();
        assert_eq!(restore.label(), "RESTORE_SNAPSHOT");
    }
}
