//! Reducer trait and the ordered registry the dispatcher walks.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    command::Command,
    config::KernelConfig,
    error::{ReducerError, RegistryError},
    handlers::{
        ActivityReducer, ArchitectureReducer, GoalReducer, MemoryReducer, PersonaReducer,
        PluginReducer,
    },
    patch::StatePatch,
    sandbox::EvolutionReducer,
    scheduler::SchedulerReducer,
    snapshot::SnapshotReducer,
    state::{StateKey, WorldState},
};

/// Per-dispatch inputs shared by every reducer handling one command.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext<'a> {
    /// Kernel configuration.
    pub config: &'a KernelConfig,
    /// Timestamp drawn once for the whole dispatch.
    pub now: DateTime<Utc>,
    /// Identifier drawn once for the whole dispatch.
    pub dispatch_id: &'a str,
}

impl<'a> ReduceContext<'a> {
    /// Bundles the dispatch inputs.
    #[must_use]
    pub const fn new(config: &'a KernelConfig, now: DateTime<Utc>, dispatch_id: &'a str) -> Self {
        Self {
            config,
            now,
            dispatch_id,
        }
    }

    /// Deterministic id for an entity created by this dispatch. Two reducers
    /// asking with the same prefix get the same id, which is how the scheduler
    /// and the goal reducer agree on a new goal's id.
    #[must_use]
    pub fn derive_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.dispatch_id)
    }

    /// Live interval for a frequency-table key.
    #[must_use]
    pub fn interval(&self, state: &WorldState, key: &str) -> u64 {
        state
            .tuning
            .interval(key, self.config.default_interval_ticks)
    }

    /// Refuses an illegal transition: an error in strict mode, an empty patch
    /// otherwise.
    pub fn reject(
        &self,
        command: &Command,
        reason: impl Into<String>,
    ) -> Result<StatePatch, ReducerError> {
        if self.config.strict_transitions {
            Err(ReducerError::InvalidTransition {
                command: command.name().to_string(),
                reason: reason.into(),
            })
        } else {
            Ok(StatePatch::default())
        }
    }
}

/// A pure function from (state, command) to a patch over its own sub-records.
pub trait Reducer: Send + Sync + fmt::Debug {
    /// Stable name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Sub-records this reducer may write.
    fn domain(&self) -> &'static [StateKey];

    /// Computes the patch for `command`. Commands outside the reducer's
    /// concern produce an empty patch.
    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError>;
}

/// Reducers in registration order, with the owner of every declared key.
#[derive(Clone, Default)]
pub struct ReducerRegistry {
    reducers: Vec<Arc<dyn Reducer>>,
    owners: BTreeMap<StateKey, &'static str>,
}

impl ReducerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in reducer: scheduler, evolution, architecture, snapshot,
    /// activity, goals, memory, persona, plugins.
    #[must_use]
    pub fn standard() -> Self {
        let reducers: [Arc<dyn Reducer>; 9] = [
            Arc::new(SchedulerReducer),
            Arc::new(EvolutionReducer),
            Arc::new(ArchitectureReducer),
            Arc::new(SnapshotReducer),
            Arc::new(ActivityReducer),
            Arc::new(GoalReducer),
            Arc::new(MemoryReducer),
            Arc::new(PersonaReducer),
            Arc::new(PluginReducer),
        ];
        let mut registry = Self::new();
        for reducer in reducers {
            registry.insert(reducer);
        }
        registry
    }

    /// Appends a reducer whose domain is disjoint from every registered one.
    pub fn register(&mut self, reducer: impl Reducer + 'static) -> Result<&mut Self, RegistryError> {
        self.check_name(reducer.name())?;
        if let Some((key, existing)) = reducer
            .domain()
            .iter()
            .find_map(|key| self.owners.get(key).map(|owner| (*key, *owner)))
        {
            return Err(RegistryError::OverlappingDomain {
                incoming: reducer.name(),
                existing,
                key,
            });
        }
        self.insert(Arc::new(reducer));
        Ok(self)
    }

    /// Appends a reducer even if its domain overlaps; on a shared key the
    /// later reducer's patch wins.
    pub fn register_overlapping(
        &mut self,
        reducer: impl Reducer + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.check_name(reducer.name())?;
        self.insert(Arc::new(reducer));
        Ok(self)
    }

    /// Consuming form of [`Self::register`].
    pub fn with(mut self, reducer: impl Reducer + 'static) -> Result<Self, RegistryError> {
        self.register(reducer)?;
        Ok(self)
    }

    /// Reducers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Reducer> {
        self.reducers.iter().map(AsRef::as_ref)
    }

    /// Reducer names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|reducer| reducer.name()).collect()
    }

    /// Latest reducer registered for `key`.
    #[must_use]
    pub fn owner(&self, key: StateKey) -> Option<&'static str> {
        self.owners.get(&key).copied()
    }

    /// Number of registered reducers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }

    fn check_name(&self, name: &'static str) -> Result<(), RegistryError> {
        if self.reducers.iter().any(|reducer| reducer.name() == name) {
            return Err(RegistryError::DuplicateName(name));
        }
        Ok(())
    }

    fn insert(&mut self, reducer: Arc<dyn Reducer>) {
        for key in reducer.domain() {
            self.owners.insert(*key, reducer.name());
        }
        self.reducers.push(reducer);
    }
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("reducers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Shadow;

    impl Reducer for Shadow {
        fn name(&self) -> &'static str {
            "shadow"
        }

        fn domain(&self) -> &'static [StateKey] {
            &[StateKey::Persona]
        }

        fn reduce(
            &self,
            _ctx: &ReduceContext<'_>,
            _state: &WorldState,
            _command: &Command,
        ) -> Result<StatePatch, ReducerError> {
            Ok(StatePatch::default())
        }
    }

    #[test]
    fn standard_registry_covers_every_key_once() {
        let registry = ReducerRegistry::standard();
        assert_eq!(registry.len(), 9);
        for key in StateKey::ALL {
            assert!(registry.owner(key).is_some(), "{key} has no owner");
        }
        let declared: usize = registry.iter().map(|reducer| reducer.domain().len()).sum();
        assert_eq!(declared, StateKey::ALL.len());
    }

    #[test]
    fn overlapping_domain_is_refused() {
        let mut registry = ReducerRegistry::standard();
        let err = registry.register(Shadow).unwrap_err();
        assert_eq!(
            err,
            RegistryError::OverlappingDomain {
                incoming: "shadow",
                existing: "persona",
                key: StateKey::Persona,
            }
        );
        registry.register_overlapping(Shadow).unwrap();
        assert_eq!(registry.owner(StateKey::Persona), Some("shadow"));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut registry = ReducerRegistry::new();
        registry.register(PersonaReducer).unwrap();
        assert_eq!(
            registry.register_overlapping(PersonaReducer).unwrap_err(),
            RegistryError::DuplicateName("persona")
        );
    }

    #[test]
    fn derived_ids_are_shared_within_a_dispatch() {
        let config = KernelConfig::default();
        let ctx = ReduceContext::new(&config, Utc::now(), "d-7");
        assert_eq!(ctx.derive_id("goal"), "goal-d-7");
        assert_eq!(ctx.derive_id("goal"), ctx.derive_id("goal"));
    }
}
