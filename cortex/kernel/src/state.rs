//! The world state aggregate and its sub-record keys.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    bounded::BoundedLog,
    config::KernelConfig,
    handlers::{
        activity::ActivityRecord, architecture::ArchitectureRecord, goals::GoalTree,
        memory::MemoryRecord, persona::Persona, plugins::PluginRegistry,
    },
    sandbox::{ModificationLogEntry, SandboxRecord, TuningRecord},
    scheduler::KernelRecord,
    snapshot::Snapshot,
};

/// Names of the disjoint sub-records making up [`WorldState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// Scheduler queue, running slot, cooldowns, tick.
    Kernel,
    /// Live frequency table and kernel version.
    Tuning,
    /// Patch proposals and validator status.
    Sandbox,
    /// Audit trail of applied modifications.
    Modifications,
    /// Snapshot ring.
    Snapshots,
    /// Activity log.
    Activity,
    /// Goal tree.
    Goals,
    /// Memory store.
    Memory,
    /// Persona traits and mood.
    Persona,
    /// Plugin registry.
    Plugins,
    /// Architecture proposals.
    Architecture,
}

impl StateKey {
    /// Every key, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Kernel,
        Self::Tuning,
        Self::Sandbox,
        Self::Modifications,
        Self::Snapshots,
        Self::Activity,
        Self::Goals,
        Self::Memory,
        Self::Persona,
        Self::Plugins,
        Self::Architecture,
    ];

    /// Serialized field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Tuning => "tuning",
            Self::Sandbox => "sandbox",
            Self::Modifications => "modifications",
            Self::Snapshots => "snapshots",
            Self::Activity => "activity",
            Self::Goals => "goals",
            Self::Memory => "memory",
            Self::Persona => "persona",
            Self::Plugins => "plugins",
            Self::Architecture => "architecture",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state replaced wholesale by every accepted transition.
///
/// Sub-records sit behind `Arc` so a transition only allocates the records it
/// changes; the rest are shared with the previous state. Nothing here is ever
/// mutated in place once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Scheduler sub-record.
    pub kernel: Arc<KernelRecord>,
    /// Live frequency table and version.
    pub tuning: Arc<TuningRecord>,
    /// Patch sandbox.
    pub sandbox: Arc<SandboxRecord>,
    /// Modification audit log.
    pub modifications: Arc<BoundedLog<ModificationLogEntry>>,
    /// Snapshot ring.
    pub snapshots: Arc<BoundedLog<Snapshot>>,
    /// Activity log.
    pub activity: Arc<ActivityRecord>,
    /// Goal tree.
    pub goals: Arc<GoalTree>,
    /// Memory store.
    pub memory: Arc<MemoryRecord>,
    /// Persona.
    pub persona: Arc<Persona>,
    /// Plugin registry.
    pub plugins: Arc<PluginRegistry>,
    /// Architecture proposals.
    pub architecture: Arc<ArchitectureRecord>,
}

impl WorldState {
    /// The documented initial state: tick 0, empty queue, idle sandbox.
    #[must_use]
    pub fn initial(config: &KernelConfig) -> Self {
        Self {
            kernel: Arc::new(KernelRecord::new(config.task_history_capacity)),
            tuning: Arc::new(TuningRecord::from_config(config)),
            sandbox: Arc::new(SandboxRecord::new(config.sandbox_log_capacity)),
            modifications: Arc::new(BoundedLog::new(config.modification_log_capacity)),
            snapshots: Arc::new(BoundedLog::new(config.snapshot_capacity)),
            activity: Arc::new(ActivityRecord::new(config.activity_log_capacity)),
            goals: Arc::new(GoalTree::default()),
            memory: Arc::new(MemoryRecord::new(config.memory_capacity)),
            persona: Arc::new(Persona::named(config.persona_name.clone())),
            plugins: Arc::new(PluginRegistry::default()),
            architecture: Arc::new(ArchitectureRecord::default()),
        }
    }

    /// Copies every sub-record into fresh allocations, sharing nothing with `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let mut snapshots = self.snapshots.emptied();
        for snapshot in self.snapshots.iter() {
            snapshots.push(snapshot.deep_copy());
        }
        Self {
            snapshots: Arc::new(snapshots),
            ..self.detached()
        }
    }

    /// Deep copy with an empty snapshot ring of the same capacity. This is the
    /// form stored inside a [`Snapshot`], so snapshots never nest.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            kernel: Arc::new(KernelRecord::clone(&self.kernel)),
            tuning: Arc::new(TuningRecord::clone(&self.tuning)),
            sandbox: Arc::new(SandboxRecord::clone(&self.sandbox)),
            modifications: Arc::new(BoundedLog::clone(&self.modifications)),
            snapshots: Arc::new(self.snapshots.emptied()),
            activity: Arc::new(ActivityRecord::clone(&self.activity)),
            goals: Arc::new(GoalTree::clone(&self.goals)),
            memory: Arc::new(MemoryRecord::clone(&self.memory)),
            persona: Arc::new(Persona::clone(&self.persona)),
            plugins: Arc::new(PluginRegistry::clone(&self.plugins)),
            architecture: Arc::new(ArchitectureRecord::clone(&self.architecture)),
        }
    }

    /// Keys whose sub-records are different allocations in `self` and `other`.
    #[must_use]
    pub fn changed_keys(&self, other: &Self) -> Vec<StateKey> {
        let pairs = [
            (StateKey::Kernel, ptr(&self.kernel) == ptr(&other.kernel)),
            (StateKey::Tuning, ptr(&self.tuning) == ptr(&other.tuning)),
            (StateKey::Sandbox, ptr(&self.sandbox) == ptr(&other.sandbox)),
            (
                StateKey::Modifications,
                ptr(&self.modifications) == ptr(&other.modifications),
            ),
            (
                StateKey::Snapshots,
                ptr(&self.snapshots) == ptr(&other.snapshots),
            ),
            (StateKey::Activity, ptr(&self.activity) == ptr(&other.activity)),
            (StateKey::Goals, ptr(&self.goals) == ptr(&other.goals)),
            (StateKey::Memory, ptr(&self.memory) == ptr(&other.memory)),
            (StateKey::Persona, ptr(&self.persona) == ptr(&other.persona)),
            (StateKey::Plugins, ptr(&self.plugins) == ptr(&other.plugins)),
            (
                StateKey::Architecture,
                ptr(&self.architecture) == ptr(&other.architecture),
            ),
        ];
        pairs
            .into_iter()
            .filter_map(|(key, same)| (!same).then_some(key))
            .collect()
    }
}

fn ptr<T>(record: &Arc<T>) -> *const T {
    Arc::as_ptr(record)
}
