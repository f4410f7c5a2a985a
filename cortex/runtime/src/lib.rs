#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Asynchronous shell around the Cortex kernel.
//!
//! The kernel only ever enqueues work. This crate owns the current state
//! ([`StateStore`]), persists it through a [`BlobStore`], and runs queued tasks
//! through a [`Driver`] that consults an [`Oracle`] and reports back as
//! syscalls.

/// Persistent object stores.
pub mod blob;

/// Runtime configuration.
pub mod config;

/// Driver loop.
pub mod driver;

/// Error types.
pub mod error;

/// Task execution.
pub mod executor;

/// Language-model boundary.
pub mod oracle;

/// State store.
pub mod store;

/// Telemetry sinks.
pub mod telemetry;

pub use blob::{BlobStore, DirBlobStore, MemoryBlobStore};
pub use config::{DriverConfig, RuntimeConfig, StoreConfig, TelemetryConfig};
pub use driver::{Driver, DriverReport, StepOutcome, TaskReport};
pub use error::{OracleError, RuntimeError, StoreError};
pub use executor::{OracleTaskExecutor, TaskExecutor, TaskOutcome};
pub use oracle::{Oracle, OracleRequest, OracleResponse, ScriptedOracle};
pub use store::StateStore;
pub use telemetry::{RuntimeTelemetry, RuntimeTelemetryBuilder};
