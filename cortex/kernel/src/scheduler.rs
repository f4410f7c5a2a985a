//! Kernel scheduler: FIFO task queue, single running slot, cooldowns, tick.

use std::{collections::BTreeMap, collections::VecDeque, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    bounded::BoundedLog,
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    state::{StateKey, WorldState},
};

/// Closed set of task types the scheduler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Free-form self reflection.
    Reflection,
    /// Break a goal into sub-goals.
    GoalDecomposition,
    /// Prune the memory store.
    MemoryConsolidation,
    /// Answer external input.
    InputResponse,
    /// Review a submitted architecture proposal.
    ArchitectureReview,
    /// Judge a patch under sandbox test.
    PatchEvaluation,
}

impl TaskType {
    /// Every task type.
    pub const ALL: [Self; 6] = [
        Self::Reflection,
        Self::GoalDecomposition,
        Self::MemoryConsolidation,
        Self::InputResponse,
        Self::ArchitectureReview,
        Self::PatchEvaluation,
    ];

    /// Key used in the cooldown and frequency tables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::GoalDecomposition => "goal_decomposition",
            Self::MemoryConsolidation => "memory_consolidation",
            Self::InputResponse => "input_response",
            Self::ArchitectureReview => "architecture_review",
            Self::PatchEvaluation => "patch_evaluation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task_type| task_type.as_str() == value)
            .ok_or_else(|| format!("unknown task type '{value}'"))
    }
}

/// Task type together with its declared payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Reflect on a topic.
    Reflection {
        /// Topic; empty means open-ended.
        #[serde(default)]
        topic: String,
    },
    /// Decompose a goal.
    GoalDecomposition {
        /// Goal to decompose.
        goal_id: String,
    },
    /// Consolidate memory.
    MemoryConsolidation,
    /// Respond to input.
    InputResponse {
        /// Input text.
        input: String,
    },
    /// Review an architecture proposal.
    ArchitectureReview {
        /// Proposal under review.
        proposal_id: String,
    },
    /// Evaluate a sandboxed patch.
    PatchEvaluation {
        /// Patch under test.
        patch_id: String,
    },
}

impl TaskKind {
    /// Type of this task.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        match self {
            Self::Reflection { .. } => TaskType::Reflection,
            Self::GoalDecomposition { .. } => TaskType::GoalDecomposition,
            Self::MemoryConsolidation => TaskType::MemoryConsolidation,
            Self::InputResponse { .. } => TaskType::InputResponse,
            Self::ArchitectureReview { .. } => TaskType::ArchitectureReview,
            Self::PatchEvaluation { .. } => TaskType::PatchEvaluation,
        }
    }
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelTask {
    /// Unique id.
    pub id: String,
    /// Type and payload.
    pub kind: TaskKind,
    /// Tick at which the task was queued.
    pub created_at_tick: u64,
    /// Correlation id of the command that queued it.
    pub trace_id: Option<String>,
}

impl KernelTask {
    /// Shorthand for `self.kind.task_type()`.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Finished normally.
    Completed,
    /// Reported as failed.
    Failed,
}

/// History entry for a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub task_id: String,
    /// Task type.
    pub task_type: TaskType,
    /// Outcome.
    pub status: TaskStatus,
    /// Summary on success, reason on failure.
    pub detail: Option<String>,
    /// Tick at which the outcome was reported.
    pub tick: u64,
    /// Wall-clock time of the report.
    pub finished_at: DateTime<Utc>,
    /// Correlation id of the task.
    pub trace_id: Option<String>,
}

/// Scheduler sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRecord {
    /// Monotonic tick counter; the only time base for cooldowns.
    pub tick: u64,
    /// Waiting tasks in arrival order.
    pub queue: VecDeque<KernelTask>,
    /// The single running slot.
    pub running: Option<KernelTask>,
    /// Tick at which each task type or coprocessor becomes eligible again.
    pub cooldowns: BTreeMap<String, u64>,
    /// Recent task outcomes.
    pub history: BoundedLog<TaskRecord>,
}

impl KernelRecord {
    /// Empty scheduler at tick 0.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            tick: 0,
            queue: VecDeque::new(),
            running: None,
            cooldowns: BTreeMap::new(),
            history: BoundedLog::new(history_capacity),
        }
    }

    /// Returns `true` if a task of `task_type` is queued or running.
    #[must_use]
    pub fn has_type(&self, task_type: TaskType) -> bool {
        self.running
            .iter()
            .chain(self.queue.iter())
            .any(|task| task.task_type() == task_type)
    }

    /// Returns `true` once the tick has reached the key's cooldown.
    #[must_use]
    pub fn is_eligible(&self, key: &str) -> bool {
        self.cooldowns
            .get(key)
            .map_or(true, |ready_at| self.tick >= *ready_at)
    }

    /// First queued task whose type is eligible, if nothing is running.
    #[must_use]
    pub fn next_runnable(&self) -> Option<&KernelTask> {
        if self.running.is_some() {
            return None;
        }
        self.queue
            .iter()
            .find(|task| self.is_eligible(task.task_type().as_str()))
    }

    /// Queued task with the given id.
    #[must_use]
    pub fn queued(&self, task_id: &str) -> Option<&KernelTask> {
        self.queue.iter().find(|task| task.id == task_id)
    }
}

/// Owns the `kernel` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerReducer;

impl Reducer for SchedulerReducer {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Kernel]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let kernel = state.kernel.as_ref();
        let trace_id = command.trace_id.as_deref();
        let patch = match &command.syscall {
            Syscall::EnqueueTask { task, id } => {
                let id = id.clone().filter(|id| !id.trim().is_empty());
                enqueue(ctx, kernel, task.clone(), id, trace_id)
            }
            Syscall::SetRunning { task_id } => {
                if let Some(running) = &kernel.running {
                    return ctx.reject(command, format!("task '{}' is already running", running.id));
                }
                let Some(position) = kernel.queue.iter().position(|task| &task.id == task_id) else {
                    return ctx.reject(command, format!("task '{task_id}' is not queued"));
                };
                let mut next = kernel.clone();
                next.running = next.queue.remove(position);
                StatePatch::default().kernel(next)
            }
            Syscall::CompleteTask { task_id, summary } => {
                let Some(task) = running_task(kernel, task_id) else {
                    return ctx.reject(command, format!("task '{task_id}' is not running"));
                };
                let key = task.task_type().as_str();
                let mut next = finish(ctx, kernel, task, TaskStatus::Completed, summary.clone());
                let ready_at = kernel.tick.saturating_add(ctx.interval(state, key));
                next.cooldowns.insert(key.to_string(), ready_at);
                StatePatch::default().kernel(next)
            }
            Syscall::FailTask { task_id, reason } => {
                let Some(task) = running_task(kernel, task_id) else {
                    return ctx.reject(command, format!("task '{task_id}' is not running"));
                };
                let detail = Some(reason.clone()).filter(|reason| !reason.is_empty());
                StatePatch::default().kernel(finish(ctx, kernel, task, TaskStatus::Failed, detail))
            }
            Syscall::Tick {} => {
                let mut next = kernel.clone();
                next.tick = next.tick.saturating_add(1);
                StatePatch::default().kernel(next)
            }
            Syscall::ClearQueue {} if !kernel.queue.is_empty() => {
                let mut next = kernel.clone();
                next.queue.clear();
                StatePatch::default().kernel(next)
            }
            Syscall::RecordCoprocessorRun { coprocessor } if !coprocessor.trim().is_empty() => {
                let mut next = kernel.clone();
                next.cooldowns.insert(
                    coprocessor.clone(),
                    kernel.tick.saturating_add(ctx.interval(state, coprocessor)),
                );
                StatePatch::default().kernel(next)
            }
            Syscall::AddGoal {
                id,
                parent_id,
                title,
            } => {
                let goal_id = id.clone().unwrap_or_else(|| ctx.derive_id("goal"));
                if state.goals.admits(&goal_id, parent_id.as_deref(), title) {
                    enqueue(ctx, kernel, TaskKind::GoalDecomposition { goal_id }, None, trace_id)
                } else {
                    StatePatch::default()
                }
            }
            Syscall::ReceiveInput { text } if !text.trim().is_empty() => enqueue(
                ctx,
                kernel,
                TaskKind::InputResponse {
                    input: text.clone(),
                },
                None,
                trace_id,
            ),
            Syscall::RequestReflection { topic } => enqueue(
                ctx,
                kernel,
                TaskKind::Reflection {
                    topic: topic.clone(),
                },
                None,
                trace_id,
            ),
            Syscall::SubmitArchitectureProposal { id, title, .. } => {
                let proposal_id = id.clone().unwrap_or_else(|| ctx.derive_id("arch"));
                if state.architecture.admits(&proposal_id, title) {
                    enqueue(
                        ctx,
                        kernel,
                        TaskKind::ArchitectureReview { proposal_id },
                        None,
                        trace_id,
                    )
                } else {
                    StatePatch::default()
                }
            }
            Syscall::BeginSandboxTest { patch_id } if state.sandbox.can_begin(patch_id) => {
                enqueue(
                    ctx,
                    kernel,
                    TaskKind::PatchEvaluation {
                        patch_id: patch_id.clone(),
                    },
                    None,
                    trace_id,
                )
            }
            Syscall::AddMemory { content, .. }
                if !content.trim().is_empty() && state.memory.nearly_full() =>
            {
                enqueue(ctx, kernel, TaskKind::MemoryConsolidation, None, trace_id)
            }
            _ => StatePatch::default(),
        };
        Ok(patch)
    }
}

fn enqueue(
    ctx: &ReduceContext<'_>,
    kernel: &KernelRecord,
    kind: TaskKind,
    id: Option<String>,
    trace_id: Option<&str>,
) -> StatePatch {
    if kernel.has_type(kind.task_type()) {
        return StatePatch::default();
    }
    let mut next = kernel.clone();
    next.queue.push_back(KernelTask {
        id: id.unwrap_or_else(|| ctx.derive_id("task")),
        kind,
        created_at_tick: kernel.tick,
        trace_id: trace_id.map(str::to_string),
    });
    StatePatch::default().kernel(next)
}

fn running_task<'a>(kernel: &'a KernelRecord, task_id: &str) -> Option<&'a KernelTask> {
    kernel.running.as_ref().filter(|task| task.id == task_id)
}

fn finish(
    ctx: &ReduceContext<'_>,
    kernel: &KernelRecord,
    task: &KernelTask,
    status: TaskStatus,
    detail: Option<String>,
) -> KernelRecord {
    let mut next = kernel.clone();
    next.running = None;
    next.history.push(TaskRecord {
        task_id: task.id.clone(),
        task_type: task.task_type(),
        status,
        detail,
        tick: kernel.tick,
        finished_at: ctx.now,
        trace_id: task.trace_id.clone(),
    });
    next
}
