//! Partial updates returned by reducers and folded by the dispatcher.

use std::sync::Arc;

use crate::{
    bounded::BoundedLog,
    handlers::{
        activity::ActivityRecord, architecture::ArchitectureRecord, goals::GoalTree,
        memory::MemoryRecord, persona::Persona, plugins::PluginRegistry,
    },
    sandbox::{ModificationLogEntry, SandboxRecord, TuningRecord},
    scheduler::KernelRecord,
    snapshot::Snapshot,
    state::{StateKey, WorldState},
};

macro_rules! state_patch {
    ($($field:ident: $ty:ty => $key:ident),+ $(,)?) => {
        /// Replacement sub-records produced for one command.
        ///
        /// `None` means "leave as is". Folding is a shallow, key-wise overwrite in
        /// which the later patch wins.
        #[derive(Debug, Clone, Default, PartialEq)]
        #[must_use]
        pub struct StatePatch {
            $(
                #[doc = concat!("Replacement `", stringify!($field), "` sub-record.")]
                pub $field: Option<Arc<$ty>>,
            )+
        }

        impl StatePatch {
            $(
                #[doc = concat!("Sets the replacement `", stringify!($field), "` sub-record.")]
                pub fn $field(mut self, record: $ty) -> Self {
                    self.$field = Some(Arc::new(record));
                    self
                }
            )+

            /// Returns `true` when the patch touches nothing.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                $(self.$field.is_none())&&+
            }

            /// Keys this patch writes, in declaration order.
            #[must_use]
            pub fn keys(&self) -> Vec<StateKey> {
                let mut keys = Vec::new();
                $(
                    if self.$field.is_some() {
                        keys.push(StateKey::$key);
                    }
                )+
                keys
            }

            /// Folds `later` over `self`; keys present in `later` win.
            pub fn merge(self, later: Self) -> Self {
                Self {
                    $($field: later.$field.or(self.$field),)+
                }
            }

            /// Shallow-merges the patch onto `base`, sharing untouched sub-records.
            #[must_use]
            pub fn apply_to(self, base: &WorldState) -> WorldState {
                WorldState {
                    $($field: self.$field.unwrap_or_else(|| Arc::clone(&base.$field)),)+
                }
            }
        }
    };
}

state_patch! {
    kernel: KernelRecord => Kernel,
    tuning: TuningRecord => Tuning,
    sandbox: SandboxRecord => Sandbox,
    modifications: BoundedLog<ModificationLogEntry> => Modifications,
    snapshots: BoundedLog<Snapshot> => Snapshots,
    activity: ActivityRecord => Activity,
    goals: GoalTree => Goals,
    memory: MemoryRecord => Memory,
    persona: Persona => Persona,
    plugins: PluginRegistry => Plugins,
    architecture: ArchitectureRecord => Architecture,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn state() -> WorldState {
        WorldState::initial(&KernelConfig::default())
    }

    #[test]
    fn empty_patch_reports_empty() {
        let patch = StatePatch::default();
        assert!(patch.is_empty());
        assert!(patch.keys().is_empty());
    }

    #[test]
    fn later_patch_wins_on_shared_key() {
        let base = state();
        let mut first = Persona::clone(&base.persona);
        first.mood = "calm".into();
        let mut second = first.clone();
        second.mood = "curious".into();
        let merged = StatePatch::default()
            .persona(first)
            .merge(StatePatch::default().persona(second));
        let next = merged.apply_to(&base);
        assert_eq!(next.persona.mood, "curious");
    }

    #[test]
    fn apply_shares_untouched_records() {
        let base = state();
        let mut kernel = KernelRecord::clone(&base.kernel);
        kernel.tick = 4;
        let next = StatePatch::default().kernel(kernel).apply_to(&base);
        assert_eq!(next.changed_keys(&base), vec![StateKey::Kernel]);
        assert_eq!(next.kernel.tick, 4);
    }

    #[test]
    fn merge_keeps_keys_from_both_sides() {
        let base = state();
        let patch = StatePatch::default()
            .goals(GoalTree::clone(&base.goals))
            .merge(StatePatch::default().plugins(PluginRegistry::clone(&base.plugins)));
        assert_eq!(patch.keys(), vec![StateKey::Goals, StateKey::Plugins]);
    }
}
