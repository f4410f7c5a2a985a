//! Runtime configuration: kernel settings plus driver, store and telemetry.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{ensure, Context, Result};
use cortex_kernel::KernelConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Kernel settings.
    pub kernel: KernelConfig,
    /// Driver loop settings.
    pub driver: DriverConfig,
    /// Persistence settings.
    pub store: StoreConfig,
    /// Log and event sinks.
    pub telemetry: TelemetryConfig,
}

/// Driver loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound on steps taken by one `run`.
    pub max_steps: usize,
    /// Oracle deadline per task, in milliseconds. Zero disables the deadline.
    pub oracle_timeout_ms: u64,
    /// Dispatch `TICK` at the start of every step.
    pub tick_every_step: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            oracle_timeout_ms: 5_000,
            tick_every_step: true,
        }
    }
}

impl DriverConfig {
    /// Oracle deadline, if any.
    #[must_use]
    pub const fn oracle_timeout(&self) -> Option<Duration> {
        if self.oracle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.oracle_timeout_ms))
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Blob key under which the world state is saved.
    pub state_key: String,
    /// Directory for the blob store; in-memory when absent.
    pub blob_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_key: "world_state.json".into(),
            blob_dir: None,
        }
    }
}

/// Log and event sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// JSON-lines log file.
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    pub event_log_path: Option<PathBuf>,
    /// Backlog of the in-memory event bus.
    pub event_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            event_log_path: None,
            event_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.kernel.validate()?;
        ensure!(
            !config.store.state_key.trim().is_empty(),
            "store.state_key must not be blank"
        );
        ensure!(config.driver.max_steps > 0, "driver.max_steps must be at least 1");
        Ok(config)
    }
}
