use std::cell::Cell;

use chrono::{TimeZone, Utc};

use crate::{
    command::{Command, Syscall},
    config::KernelConfig,
    error::ReducerError,
    registry::{ReduceContext, Reducer},
    state::WorldState,
};

/// Drives a single reducer the way the dispatcher would, one command at a time.
pub(crate) struct Harness {
    pub(crate) state: WorldState,
    config: KernelConfig,
    reducer: Box<dyn Reducer>,
    dispatches: Cell<u64>,
}

impl Harness {
    pub(crate) fn new(reducer: impl Reducer + 'static) -> Self {
        Self::with_config(reducer, KernelConfig::default())
    }

    pub(crate) fn with_config(reducer: impl Reducer + 'static, config: KernelConfig) -> Self {
        let state = WorldState::initial(&config);
        Self::with_state(reducer, config, state)
    }

    pub(crate) fn with_state(
        reducer: impl Reducer + 'static,
        config: KernelConfig,
        state: WorldState,
    ) -> Self {
        Self {
            state,
            config,
            reducer: Box::new(reducer),
            dispatches: Cell::new(0),
        }
    }

    pub(crate) fn apply(&mut self, syscall: Syscall) {
        self.apply_command(Command::new(syscall));
    }

    pub(crate) fn apply_command(&mut self, command: Command) {
        self.state = self.try_command(&command).expect("reducer failed");
    }

    pub(crate) fn try_apply(&self, syscall: Syscall) -> Result<WorldState, ReducerError> {
        self.try_command(&Command::new(syscall))
    }

    fn try_command(&self, command: &Command) -> Result<WorldState, ReducerError> {
        let dispatch = self.dispatches.get() + 1;
        self.dispatches.set(dispatch);
        let dispatch_id = format!("d-{dispatch}");
        let now = Utc
            .timestamp_opt(1_700_000_000 + i64::try_from(dispatch).unwrap_or_default(), 0)
            .unwrap();
        let ctx = ReduceContext::new(&self.config, now, &dispatch_id);
        let patch = self.reducer.reduce(&ctx, &self.state, command)?;
        Ok(patch.apply_to(&self.state))
    }
}
