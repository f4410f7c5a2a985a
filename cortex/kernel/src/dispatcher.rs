//! The single entry point that turns actions into new states.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    command::{Action, Command},
    config::KernelConfig,
    error::DispatchError,
    ids::{Clock, IdSource, SystemClock, UuidIds},
    patch::StatePatch,
    registry::{ReduceContext, ReducerRegistry},
    state::WorldState,
};

/// Routes every action through the registry and folds the resulting patches.
///
/// The dispatcher holds no state of its own; callers pass the current
/// `Arc<WorldState>` in and install whatever comes back.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ReducerRegistry,
    config: KernelConfig,
    ids: Arc<dyn IdSource>,
    clock: Arc<dyn Clock>,
}

/// Builder for [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    registry: Option<ReducerRegistry>,
    config: KernelConfig,
    ids: Option<Arc<dyn IdSource>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DispatcherBuilder {
    /// Uses `registry` instead of [`ReducerRegistry::standard`].
    #[must_use]
    pub fn registry(mut self, registry: ReducerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Kernel configuration.
    #[must_use]
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Identifier source; random UUIDs by default.
    #[must_use]
    pub fn ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Clock; the system clock by default.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Finalises the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry.unwrap_or_else(ReducerRegistry::standard),
            config: self.config,
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidIds)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }
}

impl Dispatcher {
    /// Standard registry, random ids, system clock.
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Registered reducers.
    #[must_use]
    pub const fn registry(&self) -> &ReducerRegistry {
        &self.registry
    }

    /// The documented initial state for this configuration.
    #[must_use]
    pub fn initial_state(&self) -> Arc<WorldState> {
        Arc::new(WorldState::initial(&self.config))
    }

    /// Applies one action. When nothing changes the very same `Arc` comes back.
    ///
    /// # Errors
    ///
    /// Fails when a reducer errors or writes outside its domain; `state` is
    /// then still the current state.
    #[instrument(level = "debug", skip(self, state, action), fields(action = action.label()))]
    pub fn dispatch(
        &self,
        state: &Arc<WorldState>,
        action: &Action,
    ) -> Result<Arc<WorldState>, DispatchError> {
        match action {
            Action::Syscall(command) => self.dispatch_command(state, command),
            Action::ImportState(imported) => Ok(Arc::new(WorldState::clone(imported))),
            Action::ResetState => Ok(self.initial_state()),
            Action::RestoreSnapshot(target) => {
                let found = state
                    .snapshots
                    .find(|snapshot| snapshot.id == target.snapshot_id);
                match found {
                    Some(snapshot) => Ok(Arc::new(snapshot.restore_onto(state))),
                    None => {
                        debug!(snapshot = %target.snapshot_id, "unknown snapshot; nothing restored");
                        Ok(Arc::clone(state))
                    }
                }
            }
        }
    }

    /// Runs `command` through every reducer in registration order.
    ///
    /// # Errors
    ///
    /// See [`Self::dispatch`].
    pub fn dispatch_command(
        &self,
        state: &Arc<WorldState>,
        command: &Command,
    ) -> Result<Arc<WorldState>, DispatchError> {
        let dispatch_id = self.ids.next_id("d");
        let ctx = ReduceContext::new(&self.config, self.clock.now(), &dispatch_id);

        let mut merged = StatePatch::default();
        for reducer in self.registry.iter() {
            let patch = reducer.reduce(&ctx, state, command).map_err(|source| {
                warn!(reducer = reducer.name(), call = command.name(), error = %source, "reducer failed");
                DispatchError::Reducer {
                    reducer: reducer.name(),
                    command: command.name().to_string(),
                    source,
                }
            })?;
            if let Some(key) = patch
                .keys()
                .into_iter()
                .find(|key| !reducer.domain().contains(key))
            {
                warn!(reducer = reducer.name(), %key, "write outside declared domain");
                return Err(DispatchError::DomainViolation {
                    reducer: reducer.name(),
                    key,
                });
            }
            merged = merged.merge(patch);
        }

        if merged.is_empty() {
            return Ok(Arc::clone(state));
        }
        debug!(
            call = command.name(),
            dispatch = %dispatch_id,
            keys = ?merged.keys(),
            "state replaced"
        );
        Ok(Arc::new(merged.apply_to(state)))
    }

    /// Applies actions in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// The first dispatch error encountered.
    pub fn replay<'a>(
        &self,
        state: &Arc<WorldState>,
        actions: impl IntoIterator<Item = &'a Action>,
    ) -> Result<Arc<WorldState>, DispatchError> {
        actions
            .into_iter()
            .try_fold(Arc::clone(state), |current, action| {
                self.dispatch(&current, action)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::Syscall,
        error::ReducerError,
        ids::{FixedClock, SequentialIds},
        registry::Reducer,
        scheduler::TaskKind,
        state::StateKey,
    };
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .ids(Arc::new(SequentialIds::new()))
            .clock(Arc::new(FixedClock::default()))
            .build()
    }

    #[derive(Debug)]
    struct Trespasser;

    impl Reducer for Trespasser {
        fn name(&self) -> &'static str {
            "trespasser"
        }

        fn domain(&self) -> &'static [StateKey] {
            &[]
        }

        fn reduce(
            &self,
            _ctx: &ReduceContext<'_>,
            state: &WorldState,
            _command: &Command,
        ) -> Result<StatePatch, ReducerError> {
            let mut persona = state.persona.as_ref().clone();
            persona.mood = "smug".into();
            Ok(StatePatch::default().persona(persona))
        }
    }

    #[test]
    fn unknown_command_returns_same_arc() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let command: Command = serde_json::from_value(json!({ "call": "DANCE" })).unwrap();
        let next = dispatcher
            .dispatch(&state, &Action::Syscall(command))
            .unwrap();
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn ignored_command_returns_same_arc() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let next = dispatcher
            .dispatch(&state, &Action::syscall(Syscall::ApplyPatch {}))
            .unwrap();
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn goal_and_its_task_share_a_derived_id() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let next = dispatcher
            .dispatch(
                &state,
                &Action::syscall(Syscall::AddGoal {
                    id: None,
                    parent_id: None,
                    title: "explore".into(),
                }),
            )
            .unwrap();
        assert!(next.goals.get("goal-d-1").is_some());
        assert_eq!(
            next.kernel.queue[0].kind,
            TaskKind::GoalDecomposition {
                goal_id: "goal-d-1".into()
            }
        );
    }

    #[test]
    fn writes_outside_domain_abort_dispatch() {
        let registry = ReducerRegistry::new().with(Trespasser).unwrap();
        let dispatcher = Dispatcher::builder().registry(registry).build();
        let state = dispatcher.initial_state();
        let err = dispatcher
            .dispatch(&state, &Action::syscall(Syscall::Tick {}))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::DomainViolation {
                reducer: "trespasser",
                key: StateKey::Persona,
            }
        );
    }

    #[test]
    fn strict_reducer_error_discards_other_patches() {
        let dispatcher = Dispatcher::builder()
            .config(KernelConfig::default().strict())
            .build();
        let state = dispatcher.initial_state();
        let err = dispatcher
            .dispatch(
                &state,
                &Action::syscall(Syscall::CompleteTask {
                    task_id: "ghost".into(),
                    summary: None,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Reducer { reducer: "scheduler", .. }));
    }

    #[test]
    fn reset_and_import_bypass_reducers() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let ticked = dispatcher
            .dispatch(&state, &Action::syscall(Syscall::Tick {}))
            .unwrap();
        let reset = dispatcher.dispatch(&ticked, &Action::ResetState).unwrap();
        assert_eq!(reset.kernel.tick, 0);
        let imported = dispatcher
            .dispatch(&reset, &Action::ImportState(Box::new(WorldState::clone(&ticked))))
            .unwrap();
        assert_eq!(*imported, *ticked);
    }

    #[test]
    fn restore_unknown_snapshot_is_noop() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let next = dispatcher.dispatch(&state, &Action::restore("nope")).unwrap();
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn replay_applies_in_order() {
        let dispatcher = dispatcher();
        let state = dispatcher.initial_state();
        let actions = vec![
            Action::syscall(Syscall::Tick {}),
            Action::syscall(Syscall::Tick {}),
            Action::syscall(Syscall::Tick {}),
        ];
        let next = dispatcher.replay(&state, &actions).unwrap();
        assert_eq!(next.kernel.tick, 3);
    }
}
