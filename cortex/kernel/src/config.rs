//! Kernel configuration: capacities, cooldown intervals, transition strictness.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, sandbox::PatchVersion, scheduler::TaskType};

/// Default capacity of the snapshot ring.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 10;
/// Default capacity of the modification log.
pub const DEFAULT_MODIFICATION_LOG_CAPACITY: usize = 50;
/// Default capacity of the sandbox test log.
pub const DEFAULT_SANDBOX_LOG_CAPACITY: usize = 20;
/// Default capacity of the activity log.
pub const DEFAULT_ACTIVITY_LOG_CAPACITY: usize = 100;
/// Default capacity of the completed/failed task history.
pub const DEFAULT_TASK_HISTORY_CAPACITY: usize = 50;
/// Default capacity of the memory store.
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;
/// Interval applied to keys missing from the live frequency table.
pub const DEFAULT_INTERVAL_TICKS: u64 = 10;

/// Static parameters the dispatcher and reducers read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Snapshots retained before the oldest is evicted.
    pub snapshot_capacity: usize,
    /// Modification log entries retained.
    pub modification_log_capacity: usize,
    /// Sandbox test log lines retained.
    pub sandbox_log_capacity: usize,
    /// Activity log entries retained.
    pub activity_log_capacity: usize,
    /// Task outcomes retained in the scheduler history.
    pub task_history_capacity: usize,
    /// Memory entries retained.
    pub memory_capacity: usize,
    /// Cooldown interval for keys absent from the frequency table.
    pub default_interval_ticks: u64,
    /// Kernel version installed by the initial state.
    pub initial_version: PatchVersion,
    /// Name given to the persona in the initial state.
    pub persona_name: String,
    /// Surface illegal transitions as errors instead of silent no-ops.
    pub strict_transitions: bool,
    /// Seed values for the live frequency table, keyed by task type or coprocessor.
    pub intervals: BTreeMap<String, u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            modification_log_capacity: DEFAULT_MODIFICATION_LOG_CAPACITY,
            sandbox_log_capacity: DEFAULT_SANDBOX_LOG_CAPACITY,
            activity_log_capacity: DEFAULT_ACTIVITY_LOG_CAPACITY,
            task_history_capacity: DEFAULT_TASK_HISTORY_CAPACITY,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            default_interval_ticks: DEFAULT_INTERVAL_TICKS,
            initial_version: PatchVersion::new(1, 0, 0),
            persona_name: "Cortex".into(),
            strict_transitions: false,
            intervals: default_intervals(),
        }
    }
}

impl KernelConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading kernel config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every capacity can hold at least one entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("snapshot_capacity", self.snapshot_capacity),
            ("modification_log_capacity", self.modification_log_capacity),
            ("sandbox_log_capacity", self.sandbox_log_capacity),
            ("activity_log_capacity", self.activity_log_capacity),
            ("task_history_capacity", self.task_history_capacity),
            ("memory_capacity", self.memory_capacity),
        ];
        if let Some(&(field, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroCapacity { field });
        }
        if let Some(key) = self.intervals.keys().find(|key| key.trim().is_empty()) {
            return Err(ConfigError::BlankIntervalKey(key.clone()));
        }
        Ok(())
    }

    /// Builder-style toggle for strict transitions.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict_transitions = true;
        self
    }
}

fn default_intervals() -> BTreeMap<String, u64> {
    TaskType::ALL
        .iter()
        .map(|task_type| {
            let ticks = match task_type {
                TaskType::Reflection => 20,
                TaskType::GoalDecomposition => 5,
                TaskType::MemoryConsolidation => 30,
                TaskType::InputResponse => 1,
                TaskType::ArchitectureReview => 15,
                TaskType::PatchEvaluation => 10,
            };
            (task_type.as_str().to_string(), ticks)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_seed_every_task_type() {
        let config = KernelConfig::default();
        for task_type in TaskType::ALL {
            assert!(config.intervals.contains_key(task_type.as_str()));
        }
        assert_eq!(config.snapshot_capacity, 10);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = KernelConfig::from_toml_str(
            r#"
snapshot_capacity = 3
strict_transitions = true
initial_version = "2.1.0"

[intervals]
reflection = 7
"#,
        )
        .unwrap();
        assert_eq!(config.snapshot_capacity, 3);
        assert!(config.strict_transitions);
        assert_eq!(config.initial_version, PatchVersion::new(2, 1, 0));
        assert_eq!(config.intervals.get("reflection"), Some(&7));
        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_CAPACITY);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = KernelConfig::from_toml_str("memory_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("memory_capacity"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kernel.toml");
        fs::write(&path, "default_interval_ticks = 4\n").unwrap();
        let config = KernelConfig::load(&path).unwrap();
        assert_eq!(config.default_interval_ticks, 4);
    }
}
