//! Turns a running kernel task into follow-up syscalls.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_kernel::{
    handlers::{activity::ActivityLevel, goals::GoalStatus, memory::MemoryImportance},
    sandbox::{evaluate_against_history, SandboxStatus},
    KernelConfig, KernelTask, Syscall, TaskKind, WorldState,
};
use serde_json::{json, Value};

use crate::{
    error::OracleError,
    oracle::{Oracle, OracleRequest, OracleResponse},
};

const RECENT_MEMORIES: usize = 5;

/// What executing a task produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Domain syscalls to dispatch before the task is completed.
    pub follow_ups: Vec<Syscall>,
    /// One-line summary stored on the task record.
    pub summary: String,
}

impl TaskOutcome {
    fn new(summary: impl Into<String>) -> Self {
        Self {
            follow_ups: Vec::new(),
            summary: summary.into(),
        }
    }

    fn then(mut self, syscall: Syscall) -> Self {
        self.follow_ups.push(syscall);
        self
    }
}

/// Performs the work behind a task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes `task` against a view of the state taken when it started.
    async fn execute(
        &self,
        state: &WorldState,
        task: &KernelTask,
    ) -> Result<TaskOutcome, OracleError>;
}

/// Executor backed by an [`Oracle`]. Memory consolidation and patch evaluation
/// are decided locally.
#[derive(Clone)]
pub struct OracleTaskExecutor {
    oracle: Arc<dyn Oracle>,
    default_interval: u64,
}

impl std::fmt::Debug for OracleTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleTaskExecutor")
            .field("default_interval", &self.default_interval)
            .finish_non_exhaustive()
    }
}

impl OracleTaskExecutor {
    /// Wraps an oracle for a dispatcher running `config`. Patches are judged
    /// against that config's fallback interval.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>, config: &KernelConfig) -> Self {
        Self {
            oracle,
            default_interval: config.default_interval_ticks,
        }
    }

    async fn ask(
        &self,
        state: &WorldState,
        task: &KernelTask,
        prompt: String,
    ) -> Result<OracleResponse, OracleError> {
        let response = self
            .oracle
            .complete(OracleRequest {
                task_id: task.id.clone(),
                task_type: task.task_type(),
                prompt,
                context: context_of(state),
            })
            .await?;
        if response.text.trim().is_empty() && response.data.is_null() {
            return Err(OracleError::Malformed("empty answer".into()));
        }
        Ok(response)
    }
}

#[async_trait]
impl TaskExecutor for OracleTaskExecutor {
    async fn execute(
        &self,
        state: &WorldState,
        task: &KernelTask,
    ) -> Result<TaskOutcome, OracleError> {
        match &task.kind {
            TaskKind::Reflection { topic } => {
                let subject = if topic.trim().is_empty() {
                    "your recent activity"
                } else {
                    topic.as_str()
                };
                let answer = self
                    .ask(state, task, format!("Reflect on {subject}."))
                    .await?;
                let mut tags = vec!["reflection".to_string()];
                if !topic.trim().is_empty() {
                    tags.push(topic.clone());
                }
                let mut outcome = TaskOutcome::new(format!("reflected on {subject}")).then(
                    Syscall::AddMemory {
                        content: answer.text.trim().to_string(),
                        importance: MemoryImportance::Medium,
                        tags,
                    },
                );
                if let Some(mood) = answer.data.get("mood").and_then(Value::as_str) {
                    outcome = outcome.then(Syscall::SetMood {
                        mood: mood.to_string(),
                    });
                }
                Ok(outcome)
            }
            TaskKind::GoalDecomposition { goal_id } => {
                let Some(goal) = state.goals.get(goal_id) else {
                    return Ok(TaskOutcome::new(format!("goal {goal_id} no longer exists")));
                };
                let answer = self
                    .ask(
                        state,
                        task,
                        format!(
                            "Break the goal '{}' into concrete sub-goals, one per line.",
                            goal.title
                        ),
                    )
                    .await?;
                let subgoals = subgoals_of(&answer);
                if subgoals.is_empty() {
                    return Err(OracleError::Malformed(format!(
                        "no sub-goals proposed for {goal_id}"
                    )));
                }
                let summary = format!("split {goal_id} into {} sub-goal(s)", subgoals.len());
                let outcome = subgoals
                    .into_iter()
                    .fold(TaskOutcome::new(summary), |outcome, title| {
                        outcome.then(Syscall::AddGoal {
                            id: None,
                            parent_id: Some(goal_id.clone()),
                            title,
                        })
                    });
                Ok(outcome.then(Syscall::SetGoalStatus {
                    goal_id: goal_id.clone(),
                    status: GoalStatus::Active,
                }))
            }
            TaskKind::MemoryConsolidation => {
                let keep_at_least = state.memory.entries.capacity() / 2;
                Ok(
                    TaskOutcome::new(format!("consolidated memory down to {keep_at_least}"))
                        .then(Syscall::ConsolidateMemory { keep_at_least }),
                )
            }
            TaskKind::InputResponse { input } => {
                let answer = self.ask(state, task, input.clone()).await?;
                let reply = answer.text.trim().to_string();
                Ok(TaskOutcome::new("answered input")
                    .then(Syscall::AddLog {
                        level: ActivityLevel::Info,
                        source: state.persona.name.clone(),
                        message: reply.clone(),
                    })
                    .then(Syscall::AddMemory {
                        content: format!("asked: {input}\nanswered: {reply}"),
                        importance: MemoryImportance::Low,
                        tags: vec!["conversation".into()],
                    }))
            }
            TaskKind::ArchitectureReview { proposal_id } => {
                let Some(proposal) = state.architecture.pending(proposal_id) else {
                    return Ok(TaskOutcome::new(format!(
                        "proposal {proposal_id} is no longer pending"
                    )));
                };
                let answer = self
                    .ask(
                        state,
                        task,
                        format!(
                            "Review the architecture proposal '{}': {}\nAnswer APPROVE or REJECT with a reason.",
                            proposal.title, proposal.description
                        ),
                    )
                    .await?;
                if approves(&answer) {
                    Ok(TaskOutcome::new(format!("implemented {proposal_id}")).then(
                        Syscall::ImplementArchitectureProposal {
                            proposal_id: proposal_id.clone(),
                        },
                    ))
                } else {
                    Ok(TaskOutcome::new(format!("rejected {proposal_id}")).then(
                        Syscall::RejectArchitectureProposal {
                            proposal_id: proposal_id.clone(),
                            reason: answer.text.trim().to_string(),
                        },
                    ))
                }
            }
            TaskKind::PatchEvaluation { patch_id } => {
                Ok(evaluate_patch(state, patch_id, self.default_interval))
            }
        }
    }
}

fn evaluate_patch(state: &WorldState, patch_id: &str, default_interval: u64) -> TaskOutcome {
    let sandbox = state.sandbox.as_ref();
    let proposal = sandbox
        .active_proposal()
        .filter(|proposal| proposal.id == patch_id && sandbox.status == SandboxStatus::Testing);
    let Some(proposal) = proposal else {
        return TaskOutcome::new(format!("patch {patch_id} is not under test"));
    };
    let current = state
        .tuning
        .interval(&proposal.target, default_interval);
    let verdict = evaluate_against_history(proposal, current, &state.kernel.history);
    let outcome = TaskOutcome::new(format!(
        "patch {patch_id} {}",
        if verdict.passed { "passed" } else { "failed" }
    ))
    .then(Syscall::ConcludeSandboxTest {
        passed: verdict.passed,
        reason: verdict.reason,
    });
    if verdict.passed {
        outcome.then(Syscall::ApplyPatch {})
    } else {
        outcome
    }
}

fn context_of(state: &WorldState) -> Value {
    let memories: Vec<&str> = state
        .memory
        .entries
        .iter()
        .rev()
        .take(RECENT_MEMORIES)
        .map(|entry| entry.content.as_str())
        .collect();
    json!({
        "persona": {
            "name": state.persona.name,
            "mood": state.persona.mood,
        },
        "tick": state.kernel.tick,
        "goals": state.goals.goals.len(),
        "recentMemories": memories,
    })
}

fn subgoals_of(answer: &OracleResponse) -> Vec<String> {
    if let Some(items) = answer.data.get("subgoals").and_then(Value::as_array) {
        return items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
            .collect();
    }
    answer
        .text
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
                .trim()
        })
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .collect()
}

fn approves(answer: &OracleResponse) -> bool {
    answer.data.get("approve").and_then(Value::as_bool).map_or_else(
        || {
            let text = answer.text.trim_start().to_ascii_lowercase();
            text.starts_with("approve") || text.starts_with("yes")
        },
        |approve| approve,
    )
}
