//! Plugin registry.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    state::{StateKey, WorldState},
};

/// A registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    /// Plugin id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether the plugin is active.
    pub enabled: bool,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// Plugin sub-record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRegistry {
    /// Plugins in registration order.
    pub plugins: IndexMap<String, Plugin>,
}

impl PluginRegistry {
    /// Enabled plugins in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.values().filter(|plugin| plugin.enabled)
    }
}

/// Owns the `plugins` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginReducer;

impl Reducer for PluginReducer {
    fn name(&self) -> &'static str {
        "plugins"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Plugins]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let registry = state.plugins.as_ref();
        let mut next = registry.clone();
        match &command.syscall {
            Syscall::RegisterPlugin {
                id,
                name,
                description,
            } => {
                if id.trim().is_empty() || name.trim().is_empty() {
                    return Ok(StatePatch::default());
                }
                if registry.plugins.contains_key(id) {
                    return ctx.reject(command, format!("plugin '{id}' is already registered"));
                }
                next.plugins.insert(
                    id.clone(),
                    Plugin {
                        id: id.clone(),
                        name: name.clone(),
                        description: description.clone(),
                        enabled: true,
                        registered_at: ctx.now,
                    },
                );
            }
            Syscall::SetPluginEnabled { plugin_id, enabled } => match next.plugins.get_mut(plugin_id) {
                Some(plugin) if plugin.enabled != *enabled => plugin.enabled = *enabled,
                _ => return Ok(StatePatch::default()),
            },
            Syscall::UnregisterPlugin { plugin_id } => {
                if next.plugins.shift_remove(plugin_id).is_none() {
                    return Ok(StatePatch::default());
                }
            }
            _ => return Ok(StatePatch::default()),
        }
        Ok(StatePatch::default().plugins(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::KernelConfig, test_support::Harness};

    fn register(id: &str) -> Syscall {
        Syscall::RegisterPlugin {
            id: id.into(),
            name: format!("{id} plugin"),
            description: String::new(),
        }
    }

    #[test]
    fn register_toggle_unregister() {
        let mut harness = Harness::new(PluginReducer);
        harness.apply(register("vision"));
        harness.apply(register("speech"));
        harness.apply(Syscall::SetPluginEnabled {
            plugin_id: "vision".into(),
            enabled: false,
        });
        let enabled: Vec<_> = harness.state.plugins.enabled().map(|p| p.id.as_str()).collect();
        assert_eq!(enabled, vec!["speech"]);
        harness.apply(Syscall::UnregisterPlugin {
            plugin_id: "speech".into(),
        });
        assert_eq!(harness.state.plugins.plugins.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_silent_by_default() {
        let mut harness = Harness::new(PluginReducer);
        harness.apply(register("vision"));
        let before = harness.state.clone();
        harness.apply(register("vision"));
        assert!(std::sync::Arc::ptr_eq(&before.plugins, &harness.state.plugins));
    }

    #[test]
    fn duplicate_registration_errors_in_strict_mode() {
        let mut harness = Harness::with_config(PluginReducer, KernelConfig::default().strict());
        harness.apply(register("vision"));
        assert!(harness.try_apply(register("vision")).is_err());
    }
}
