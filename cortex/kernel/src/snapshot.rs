//! Snapshot ring: full-state copies taken on request and before
//! architecture-changing commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    sandbox::SandboxStatus,
    state::{StateKey, WorldState},
};

/// A tagged copy of the world state. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot id.
    pub id: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Why it was taken.
    pub reason: String,
    /// Tick at capture time.
    pub tick: u64,
    /// The captured state, with an empty snapshot ring.
    pub state: Box<WorldState>,
}

impl Snapshot {
    /// Captures `state` without its snapshot ring.
    #[must_use]
    pub fn capture(
        state: &WorldState,
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            reason: reason.into(),
            tick: state.kernel.tick,
            state: Box::new(state.detached()),
        }
    }

    /// A fresh copy of the captured state. Total and side-effect free.
    #[must_use]
    pub fn restore(&self) -> WorldState {
        self.state.detached()
    }

    /// The captured state with `current`'s snapshot ring carried over.
    #[must_use]
    pub fn restore_onto(&self, current: &WorldState) -> WorldState {
        WorldState {
            snapshots: Arc::clone(&current.snapshots),
            ..self.restore()
        }
    }

    /// Copy that shares no allocation with `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            timestamp: self.timestamp,
            reason: self.reason.clone(),
            tick: self.tick,
            state: Box::new(self.state.detached()),
        }
    }
}

/// Owns the `snapshots` ring.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotReducer;

impl Reducer for SnapshotReducer {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Snapshots]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let reason = match &command.syscall {
            Syscall::TakeSnapshot { reason } if reason.trim().is_empty() => "manual".to_string(),
            Syscall::TakeSnapshot { reason } => reason.clone(),
            Syscall::ApplyPatch {} if state.sandbox.status == SandboxStatus::Passed => {
                let active = state.sandbox.active.as_deref().unwrap_or("patch");
                format!("before applying {active}")
            }
            Syscall::ImplementArchitectureProposal { proposal_id }
                if state.architecture.pending(proposal_id).is_some() =>
            {
                format!("before implementing {proposal_id}")
            }
            _ => return Ok(StatePatch::default()),
        };
        let snapshot = Snapshot::capture(state, ctx.derive_id("snap"), ctx.now, reason);
        Ok(StatePatch::default().snapshots(state.snapshots.with(snapshot)))
    }
}
