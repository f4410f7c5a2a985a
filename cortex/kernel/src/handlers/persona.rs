//! Persona name, mood and clamped traits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    state::{StateKey, WorldState},
};

/// The agent's presented identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name.
    pub name: String,
    /// Current mood.
    pub mood: String,
    /// Trait strengths in `0.0..=1.0`.
    pub traits: BTreeMap<String, f32>,
}

impl Persona {
    /// Neutral persona with balanced default traits.
    #[must_use]
    pub fn named(name: String) -> Self {
        let traits = ["curiosity", "caution", "empathy"]
            .into_iter()
            .map(|key| (key.to_string(), 0.5))
            .collect();
        Self {
            name,
            mood: "neutral".into(),
            traits,
        }
    }
}

/// Owns the `persona` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonaReducer;

impl Reducer for PersonaReducer {
    fn name(&self) -> &'static str {
        "persona"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Persona]
    }

    fn reduce(
        &self,
        _ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let persona = state.persona.as_ref();
        let mut next = persona.clone();
        match &command.syscall {
            Syscall::SetMood { mood } if !mood.trim().is_empty() => {
                next.mood = mood.trim().to_string();
            }
            Syscall::RenamePersona { name } if !name.trim().is_empty() => {
                next.name = name.trim().to_string();
            }
            Syscall::SetTrait { name, value } if !name.trim().is_empty() && value.is_finite() => {
                next.traits
                    .insert(name.trim().to_string(), value.clamp(0.0, 1.0));
            }
            _ => {}
        }
        if next == *persona {
            return Ok(StatePatch::default());
        }
        Ok(StatePatch::default().persona(next))
    }
}
