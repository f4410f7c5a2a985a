//! Bounded memory store with importance-based consolidation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::{
    bounded::BoundedLog,
    command::{Command, Syscall},
    error::ReducerError,
    patch::StatePatch,
    registry::{ReduceContext, Reducer},
    state::{StateKey, WorldState},
};

/// Retention importance of a memory. Consolidation drops lower levels first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryImportance {
    /// Routine observations; first to go.
    Low,
    /// Contextual facts.
    #[default]
    Medium,
    /// Never dropped by consolidation.
    High,
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Memory id.
    pub id: String,
    /// Text.
    pub content: String,
    /// Retention importance.
    pub importance: MemoryImportance,
    /// Search tags, deduplicated in insertion order.
    pub tags: IndexSet<String>,
    /// Kernel tick when stored.
    pub tick: u64,
    /// Wall-clock time when stored.
    pub created_at: DateTime<Utc>,
}

/// Memory sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Rolling store, oldest first.
    pub entries: BoundedLog<MemoryEntry>,
}

impl MemoryRecord {
    /// Empty store holding at most `capacity` memories.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BoundedLog::new(capacity),
        }
    }

    /// Returns `true` once the store is at least 90% full.
    #[must_use]
    pub fn nearly_full(&self) -> bool {
        self.entries.len() * 10 >= self.entries.capacity() * 9
    }

    /// Memory by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        self.entries.find(|entry| entry.id == id)
    }

    /// Memories carrying `tag`, oldest first.
    pub fn tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a MemoryEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.tags.contains(tag))
    }

    /// Ids that consolidation would drop to shrink the store to `keep_at_least`:
    /// lowest importance first, oldest first within a level, never `High`.
    #[must_use]
    pub fn consolidation_victims(&self, keep_at_least: usize) -> HashSet<String> {
        let excess = self.entries.len().saturating_sub(keep_at_least);
        let mut candidates: Vec<(MemoryImportance, usize, &str)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.importance < MemoryImportance::High)
            .map(|(position, entry)| (entry.importance, position, entry.id.as_str()))
            .collect();
        candidates.sort_unstable();
        candidates
            .into_iter()
            .take(excess)
            .map(|(_, _, id)| id.to_string())
            .collect()
    }
}

/// Owns the `memory` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryReducer;

impl Reducer for MemoryReducer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Memory]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let memory = state.memory.as_ref();
        let entries = match &command.syscall {
            Syscall::AddMemory {
                content,
                importance,
                tags,
            } if !content.trim().is_empty() => memory.entries.with(MemoryEntry {
                id: ctx.derive_id("mem"),
                content: content.clone(),
                importance: *importance,
                tags: tags
                    .iter()
                    .map(|tag| tag.trim())
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
                tick: state.kernel.tick,
                created_at: ctx.now,
            }),
            Syscall::ForgetMemory { memory_id } if memory.get(memory_id).is_some() => {
                let mut next = memory.entries.clone();
                next.retain(|entry| &entry.id != memory_id);
                next
            }
            Syscall::ConsolidateMemory { keep_at_least } => {
                let victims = memory.consolidation_victims(*keep_at_least);
                if victims.is_empty() {
                    return Ok(StatePatch::default());
                }
                let mut next = memory.entries.clone();
                next.retain(|entry| !victims.contains(&entry.id));
                next
            }
            _ => return Ok(StatePatch::default()),
        };
        Ok(StatePatch::default().memory(MemoryRecord { entries }))
    }
}
