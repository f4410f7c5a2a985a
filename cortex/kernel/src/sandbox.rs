//! Sandboxed patch validation and the live frequency table it guards.
//!
//! A proposal moves `proposed -> testing -> passed | failed`. Only a passed
//! proposal can be applied, and applying it is the single write path into
//! [`TuningRecord::frequencies`].

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    bounded::BoundedLog,
    command::{Command, Syscall},
    config::KernelConfig,
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    scheduler::{TaskRecord, TaskStatus},
    state::{StateKey, WorldState},
};

/// Semantic kernel version, serialized as `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchVersion {
    /// Major component.
    pub major: u32,
    /// Minor component; bumped by implemented architecture proposals.
    pub minor: u32,
    /// Patch component; bumped by applied tuning patches.
    pub patch: u32,
}

impl PatchVersion {
    /// Builds a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Next patch version.
    #[must_use]
    pub const fn bump_patch(self) -> Self {
        Self::new(self.major, self.minor, self.patch.saturating_add(1))
    }

    /// Next minor version, patch reset to zero.
    #[must_use]
    pub const fn bump_minor(self) -> Self {
        Self::new(self.major, self.minor.saturating_add(1), 0)
    }
}

impl fmt::Display for PatchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for PatchVersion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(format!("version '{value}' is not major.minor.patch"));
        };
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|err| format!("version '{value}': {err}"))
        };
        Ok(Self::new(parse(major)?, parse(minor)?, parse(patch)?))
    }
}

impl TryFrom<String> for PatchVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PatchVersion> for String {
    fn from(version: PatchVersion) -> Self {
        version.to_string()
    }
}

/// The live frequency table plus the kernel version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRecord {
    /// Current kernel version.
    pub version: PatchVersion,
    /// Interval in ticks per task type or coprocessor key.
    pub frequencies: BTreeMap<String, u64>,
}

impl TuningRecord {
    /// Seeds the table from configuration.
    #[must_use]
    pub fn from_config(config: &KernelConfig) -> Self {
        Self {
            version: config.initial_version,
            frequencies: config.intervals.clone(),
        }
    }

    /// Interval for `key`, or `default` when the table has no entry.
    #[must_use]
    pub fn interval(&self, key: &str, default: u64) -> u64 {
        self.frequencies.get(key).copied().unwrap_or(default)
    }
}

/// Validator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    /// Nothing under test.
    #[default]
    Idle,
    /// A proposal is being validated.
    Testing,
    /// The active proposal passed and may be applied.
    Passed,
    /// The last proposal failed and was discarded.
    Failed,
}

/// Status of a pending proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Waiting for a test slot.
    Proposed,
    /// Under test.
    Testing,
    /// Passed, waiting to be applied.
    Passed,
}

/// A proposed change to one interval of the frequency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProposal {
    /// Proposal id.
    pub id: String,
    /// Frequency-table key to change.
    pub target: String,
    /// New interval in ticks.
    pub proposed_frequency: u64,
    /// Why the change is wanted.
    pub justification: String,
    /// Lifecycle position.
    pub status: ProposalStatus,
    /// When the proposal was recorded.
    pub proposed_at: DateTime<Utc>,
}

/// One line of the sandbox test log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLogLine {
    /// When the line was written.
    pub timestamp: DateTime<Utc>,
    /// Human-readable text.
    pub message: String,
}

/// Sandbox sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Validator state.
    pub status: SandboxStatus,
    /// Proposal under test or awaiting application.
    pub active: Option<String>,
    /// Pending proposals in submission order.
    pub proposals: IndexMap<String, PatchProposal>,
    /// Bounded log of test activity.
    pub test_log: BoundedLog<SandboxLogLine>,
}

impl SandboxRecord {
    /// Idle sandbox with an empty test log.
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            status: SandboxStatus::Idle,
            active: None,
            proposals: IndexMap::new(),
            test_log: BoundedLog::new(log_capacity),
        }
    }

    /// Returns `true` when the validator is free and the proposal exists.
    #[must_use]
    pub fn can_begin(&self, patch_id: &str) -> bool {
        self.accepts_new_test() && self.proposals.contains_key(patch_id)
    }

    /// Returns `true` in the states from which a new test may start.
    #[must_use]
    pub const fn accepts_new_test(&self) -> bool {
        matches!(self.status, SandboxStatus::Idle | SandboxStatus::Failed)
    }

    /// The proposal under test or awaiting application.
    #[must_use]
    pub fn active_proposal(&self) -> Option<&PatchProposal> {
        self.active.as_ref().and_then(|id| self.proposals.get(id))
    }

    fn note(&mut self, timestamp: DateTime<Utc>, message: String) {
        self.test_log.push(SandboxLogLine { timestamp, message });
    }
}

/// What a modification changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationCategory {
    /// Frequency-table patch.
    Tuning,
    /// Implemented architecture proposal.
    Architecture,
}

/// How a modification was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Passed the sandbox test.
    SandboxPassed,
    /// Accepted through proposal review.
    Reviewed,
}

/// Audit entry for an applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationLogEntry {
    /// Entry id.
    pub id: String,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary.
    pub description: String,
    /// Kind of change.
    pub category: ModificationCategory,
    /// Validation route.
    pub validation_status: ValidationStatus,
    /// `true` for changes the kernel applied to itself.
    pub is_autonomous: bool,
    /// Version installed by the change.
    pub version: PatchVersion,
}

/// Outcome of [`evaluate_against_history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchVerdict {
    /// Whether the patch should be applied.
    pub passed: bool,
    /// Explanation recorded in the test log.
    pub reason: String,
}

/// Judges a proposal against recent task outcomes.
///
/// A proposal fails when it would run a task type less often while that type
/// has failures in `history`; otherwise it passes.
#[must_use]
pub fn evaluate_against_history(
    proposal: &PatchProposal,
    current_interval: u64,
    history: &BoundedLog<TaskRecord>,
) -> PatchVerdict {
    if proposal.proposed_frequency == 0 {
        return PatchVerdict {
            passed: false,
            reason: "interval must be at least one tick".into(),
        };
    }
    let failures = history
        .iter()
        .filter(|record| {
            record.status == TaskStatus::Failed && record.task_type.as_str() == proposal.target
        })
        .count();
    if failures > 0 && proposal.proposed_frequency > current_interval {
        return PatchVerdict {
            passed: false,
            reason: format!(
                "{} failed {failures} time(s) recently; slowing it from {current_interval} to {} ticks would starve it",
                proposal.target, proposal.proposed_frequency
            ),
        };
    }
    PatchVerdict {
        passed: true,
        reason: format!(
            "{} at {} ticks is consistent with {} recent outcome(s)",
            proposal.target,
            proposal.proposed_frequency,
            history.len()
        ),
    }
}

/// Owns `tuning`, `sandbox` and `modifications`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvolutionReducer;

impl Reducer for EvolutionReducer {
    fn name(&self) -> &'static str {
        "evolution"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Tuning, StateKey::Sandbox, StateKey::Modifications]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let sandbox = state.sandbox.as_ref();
        match &command.syscall {
            Syscall::ProposePatch {
                id,
                target,
                proposed_frequency,
                justification,
            } => {
                let id = id.clone().unwrap_or_else(|| ctx.derive_id("patch"));
                if target.trim().is_empty()
                    || *proposed_frequency == 0
                    || sandbox.proposals.contains_key(&id)
                {
                    return Ok(StatePatch::default());
                }
                let mut next = sandbox.clone();
                next.proposals.insert(
                    id.clone(),
                    PatchProposal {
                        id,
                        target: target.clone(),
                        proposed_frequency: *proposed_frequency,
                        justification: justification.clone(),
                        status: ProposalStatus::Proposed,
                        proposed_at: ctx.now,
                    },
                );
                Ok(StatePatch::default().sandbox(next))
            }
            Syscall::BeginSandboxTest { patch_id } => {
                if !sandbox.proposals.contains_key(patch_id) {
                    return Ok(StatePatch::default());
                }
                if !sandbox.accepts_new_test() {
                    return ctx.reject(command, format!("sandbox is {:?}", sandbox.status));
                }
                let mut next = sandbox.clone();
                let Some(proposal) = next.proposals.get_mut(patch_id) else {
                    return Ok(StatePatch::default());
                };
                proposal.status = ProposalStatus::Testing;
                let current = ctx.interval(state, &proposal.target);
                let line = format!(
                    "testing {}: {current} -> {} ticks",
                    proposal.target, proposal.proposed_frequency
                );
                next.status = SandboxStatus::Testing;
                next.active = Some(patch_id.clone());
                next.note(ctx.now, line);
                Ok(StatePatch::default().sandbox(next))
            }
            Syscall::ConcludeSandboxTest { passed, reason } => {
                if sandbox.status != SandboxStatus::Testing {
                    return ctx.reject(command, "no sandbox test is running");
                }
                let Some(active) = sandbox.active.clone() else {
                    return Err(ReducerError::CorruptState(
                        "sandbox is testing without an active proposal".into(),
                    ));
                };
                let mut next = sandbox.clone();
                if *passed {
                    if let Some(proposal) = next.proposals.get_mut(&active) {
                        proposal.status = ProposalStatus::Passed;
                    }
                    next.status = SandboxStatus::Passed;
                    next.note(ctx.now, format!("{active} passed: {reason}"));
                } else {
                    next.proposals.shift_remove(&active);
                    next.active = None;
                    next.status = SandboxStatus::Failed;
                    next.note(ctx.now, format!("{active} failed: {reason}"));
                }
                Ok(StatePatch::default().sandbox(next))
            }
            Syscall::ApplyPatch {} => {
                if sandbox.status != SandboxStatus::Passed {
                    return ctx.reject(command, format!("sandbox is {:?}, not passed", sandbox.status));
                }
                let Some(proposal) = sandbox.active_proposal().cloned() else {
                    return Err(ReducerError::CorruptState(
                        "sandbox passed without an active proposal".into(),
                    ));
                };
                let previous = ctx.interval(state, &proposal.target);
                let mut tuning = state.tuning.as_ref().clone();
                tuning
                    .frequencies
                    .insert(proposal.target.clone(), proposal.proposed_frequency);
                tuning.version = tuning.version.bump_patch();

                let entry = ModificationLogEntry {
                    id: ctx.derive_id("mod"),
                    timestamp: ctx.now,
                    description: format!(
                        "interval of {} changed from {previous} to {} ticks ({})",
                        proposal.target, proposal.proposed_frequency, proposal.id
                    ),
                    category: ModificationCategory::Tuning,
                    validation_status: ValidationStatus::SandboxPassed,
                    is_autonomous: true,
                    version: tuning.version,
                };

                let mut next = sandbox.clone();
                next.proposals.shift_remove(&proposal.id);
                next.active = None;
                next.status = SandboxStatus::Idle;
                next.note(ctx.now, format!("{} applied as {}", proposal.id, tuning.version));

                Ok(StatePatch::default()
                    .modifications(state.modifications.with(entry))
                    .tuning(tuning)
                    .sandbox(next))
            }
            Syscall::ResetSandbox {} => match sandbox.status {
                SandboxStatus::Idle => Ok(StatePatch::default()),
                SandboxStatus::Testing => ctx.reject(command, "a sandbox test is running"),
                SandboxStatus::Passed | SandboxStatus::Failed => {
                    let mut next = sandbox.clone();
                    if let Some(active) = next.active.take() {
                        next.proposals.shift_remove(&active);
                        next.note(ctx.now, format!("{active} discarded"));
                    }
                    next.status = SandboxStatus::Idle;
                    Ok(StatePatch::default().sandbox(next))
                }
            },
            Syscall::ImplementArchitectureProposal { proposal_id } => {
                let Some(proposal) = state.architecture.pending(proposal_id) else {
                    return Ok(StatePatch::default());
                };
                let mut tuning = state.tuning.as_ref().clone();
                tuning.version = tuning.version.bump_minor();
                let entry = ModificationLogEntry {
                    id: ctx.derive_id("mod"),
                    timestamp: ctx.now,
                    description: format!("implemented architecture proposal '{}'", proposal.title),
                    category: ModificationCategory::Architecture,
                    validation_status: ValidationStatus::Reviewed,
                    is_autonomous: false,
                    version: tuning.version,
                };
                Ok(StatePatch::default()
                    .modifications(state.modifications.with(entry))
                    .tuning(tuning))
            }
            _ => Ok(StatePatch::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheduler::TaskType, test_support::Harness};

    fn propose(id: &str, target: &str, frequency: u64) -> Syscall {
        Syscall::ProposePatch {
            id: Some(id.into()),
            target: target.into(),
            proposed_frequency: frequency,
            justification: "faster".into(),
        }
    }

    fn begin(id: &str) -> Syscall {
        Syscall::BeginSandboxTest {
            patch_id: id.into(),
        }
    }

    fn conclude(passed: bool) -> Syscall {
        Syscall::ConcludeSandboxTest {
            passed,
            reason: "ok".into(),
        }
    }

    #[test]
    fn version_parses_and_bumps() {
        let version: PatchVersion = "1.0.0".parse().unwrap();
        assert_eq!(version.bump_patch().to_string(), "1.0.1");
        assert_eq!(version.bump_patch().bump_minor().to_string(), "1.1.0");
        let worn = PatchVersion::new(1, u32::MAX, u32::MAX);
        assert_eq!(worn.bump_patch(), worn);
        assert_eq!(worn.bump_minor(), PatchVersion::new(1, u32::MAX, 0));
        assert!("1.0".parse::<PatchVersion>().is_err());
        assert!("1.x.0".parse::<PatchVersion>().is_err());
    }

    #[test]
    fn begin_unknown_proposal_is_noop() {
        let mut harness = Harness::new(EvolutionReducer);
        let before = harness.state.clone();
        harness.apply(begin("p1"));
        assert_eq!(harness.state, before);
    }

    #[test]
    fn begin_logs_the_proposed_change() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 5));
        harness.apply(begin("p1"));
        let sandbox = &harness.state.sandbox;
        assert_eq!(sandbox.status, SandboxStatus::Testing);
        assert_eq!(sandbox.active.as_deref(), Some("p1"));
        assert_eq!(
            sandbox.test_log.latest().map(|line| line.message.as_str()),
            Some("testing reflection: 20 -> 5 ticks")
        );
    }

    #[test]
    fn zero_frequency_proposal_is_ignored() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 0));
        assert!(harness.state.sandbox.proposals.is_empty());
    }

    #[test]
    fn apply_is_gated_on_passed() {
        let mut harness = Harness::new(EvolutionReducer);
        let tuning = harness.state.tuning.clone();

        harness.apply(Syscall::ApplyPatch {});
        assert_eq!(harness.state.tuning, tuning);

        harness.apply(propose("p1", "reflection", 5));
        harness.apply(begin("p1"));
        harness.apply(Syscall::ApplyPatch {});
        assert_eq!(harness.state.tuning, tuning);

        harness.apply(conclude(false));
        assert_eq!(harness.state.sandbox.status, SandboxStatus::Failed);
        harness.apply(Syscall::ApplyPatch {});
        assert_eq!(harness.state.tuning, tuning);
        assert!(harness.state.modifications.is_empty());
    }

    #[test]
    fn passed_patch_updates_table_once() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 5));
        harness.apply(begin("p1"));
        harness.apply(conclude(true));
        harness.apply(Syscall::ApplyPatch {});

        let state = &harness.state;
        assert_eq!(state.tuning.frequencies.get("reflection"), Some(&5));
        assert_eq!(state.tuning.version, PatchVersion::new(1, 0, 1));
        assert_eq!(state.modifications.len(), 1);
        let entry = state.modifications.latest().unwrap();
        assert!(entry.is_autonomous);
        assert_eq!(entry.category, ModificationCategory::Tuning);
        assert_eq!(state.sandbox.status, SandboxStatus::Idle);
        assert!(state.sandbox.proposals.is_empty());

        harness.apply(Syscall::ApplyPatch {});
        assert_eq!(harness.state.modifications.len(), 1);
    }

    #[test]
    fn failed_proposal_is_discarded_and_sandbox_reusable() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 5));
        harness.apply(propose("p2", "reflection", 8));
        harness.apply(begin("p1"));
        harness.apply(conclude(false));
        assert!(!harness.state.sandbox.proposals.contains_key("p1"));
        harness.apply(begin("p2"));
        assert_eq!(harness.state.sandbox.status, SandboxStatus::Testing);
    }

    #[test]
    fn cannot_begin_while_testing() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 5));
        harness.apply(propose("p2", "memory_consolidation", 8));
        harness.apply(begin("p1"));
        harness.apply(begin("p2"));
        assert_eq!(harness.state.sandbox.active.as_deref(), Some("p1"));
    }

    #[test]
    fn reset_discards_passed_proposal() {
        let mut harness = Harness::new(EvolutionReducer);
        harness.apply(propose("p1", "reflection", 5));
        harness.apply(begin("p1"));
        harness.apply(conclude(true));
        harness.apply(Syscall::ResetSandbox {});
        assert_eq!(harness.state.sandbox.status, SandboxStatus::Idle);
        assert!(harness.state.sandbox.proposals.is_empty());
        assert_eq!(harness.state.tuning.frequencies.get("reflection"), Some(&20));
    }

    #[test]
    fn strict_mode_surfaces_ungated_apply() {
        let harness = Harness::with_config(EvolutionReducer, KernelConfig::default().strict());
        let err = harness.try_apply(Syscall::ApplyPatch {}).unwrap_err();
        assert!(matches!(err, ReducerError::InvalidTransition { ref command, .. } if command == "APPLY_PATCH"));
    }

    #[test]
    fn history_verdict_protects_failing_types() {
        let mut history = BoundedLog::new(10);
        history.push(TaskRecord {
            task_id: "t1".into(),
            task_type: TaskType::Reflection,
            status: TaskStatus::Failed,
            detail: Some("timeout".into()),
            tick: 3,
            finished_at: Utc::now(),
            trace_id: None,
        });
        let proposal = PatchProposal {
            id: "p1".into(),
            target: "reflection".into(),
            proposed_frequency: 40,
            justification: String::new(),
            status: ProposalStatus::Testing,
            proposed_at: Utc::now(),
        };
        assert!(!evaluate_against_history(&proposal, 20, &history).passed);

        let faster = PatchProposal {
            proposed_frequency: 10,
            ..proposal
        };
        assert!(evaluate_against_history(&faster, 20, &history).passed);
    }
}
