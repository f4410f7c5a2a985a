#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Cortex state-orchestration kernel.
//!
//! One immutable [`WorldState`] aggregate, replaced wholesale by a
//! [`Dispatcher`] that routes every [`Command`] through an ordered
//! [`ReducerRegistry`]. The scheduler, the patch sandbox and the snapshot ring
//! are ordinary reducers over that same state, so replay and rollback need no
//! special cases.

/// Bounded FIFO log used for every capped collection in the state.
pub mod bounded;

/// Commands, wire conversion and top-level actions.
pub mod command;

/// Kernel configuration.
pub mod config;

/// Dispatcher.
pub mod dispatcher;

/// Error types.
pub mod error;

/// Domain reducers.
pub mod handlers;

/// Identifier and clock injection.
pub mod ids;

/// State patches.
pub mod patch;

/// Reducer trait and registry.
pub mod registry;

/// Sandbox, tuning record and modification log.
pub mod sandbox;

/// Task scheduler.
pub mod scheduler;

/// Snapshot ring.
pub mod snapshot;

/// World state aggregate.
pub mod state;

#[cfg(test)]
mod test_support;

pub use bounded::BoundedLog;
pub use command::{Action, Command, Syscall, WireCommand};
pub use config::KernelConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{ConfigError, DispatchError, ReducerError, RegistryError};
pub use ids::{Clock, FixedClock, IdSource, SequentialIds, SystemClock, UuidIds};
pub use patch::StatePatch;
pub use registry::{ReduceContext, Reducer, ReducerRegistry};
pub use sandbox::{PatchVersion, SandboxStatus};
pub use scheduler::{KernelTask, TaskKind, TaskType};
pub use snapshot::Snapshot;
pub use state::{StateKey, WorldState};
