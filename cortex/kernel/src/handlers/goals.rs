//! Goal tree: creation, status changes and subtree removal.

use std::collections::HashSet;

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

/// Progress of a goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Not started.
    #[default]
    Pending,
    /// Being worked on.
    Active,
    /// Achieved.
    Completed,
    /// Given up.
    Abandoned,
}

/// A node of the goal tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Goal id.
    pub id: String,
    /// Parent goal, `None` for roots.
    pub parent_id: Option<String>,
    /// Title.
    pub title: String,
    /// Progress.
    pub status: GoalStatus,
    /// Child ids in insertion order.
    pub children: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Goal sub-record: a forest keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalTree {
    /// Every goal, in insertion order.
    pub goals: IndexMap<String, Goal>,
    /// Root ids in insertion order.
    pub roots: Vec<String>,
}

impl GoalTree {
    /// Returns `true` if a goal with these fields would be accepted.
    #[must_use]
    pub fn admits(&self, id: &str, parent_id: Option<&str>, title: &str) -> bool {
        !id.trim().is_empty()
            && !title.trim().is_empty()
            && !self.goals.contains_key(id)
            && parent_id.map_or(true, |parent| self.goals.contains_key(parent))
    }

    /// Goal by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.get(id)
    }

    /// `id` followed by all its descendants, depth first. Each goal appears
    /// once even when an imported tree links back to an ancestor.
    #[must_use]
    pub fn subtree(&self, id: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(goal) = self.goals.get(&current) {
                stack.extend(goal.children.iter().rev().cloned());
                ordered.push(current);
            }
        }
        ordered
    }
}

/// Owns the `goals` sub-record.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoalReducer;

impl Reducer for GoalReducer {
    fn name(&self) -> &'static str {
        "goals"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Goals]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let tree = state.goals.as_ref();
        match &command.syscall {
            Syscall::AddGoal {
                id,
                parent_id,
                title,
            } => {
                let id = id.clone().unwrap_or_else(|| ctx.derive_id("goal"));
                if !tree.admits(&id, parent_id.as_deref(), title) {
                    return Ok(StatePatch::default());
                }
                let mut next = tree.clone();
                match parent_id.as_deref().and_then(|parent| next.goals.get_mut(parent)) {
                    Some(parent) => parent.children.push(id.clone()),
                    None => next.roots.push(id.clone()),
                }
                next.goals.insert(
                    id.clone(),
                    Goal {
                        id,
                        parent_id: parent_id.clone(),
                        title: title.trim().to_string(),
                        status: GoalStatus::Pending,
                        children: Vec::new(),
                        created_at: ctx.now,
                    },
                );
                Ok(StatePatch::default().goals(next))
            }
            Syscall::SetGoalStatus { goal_id, status } => match tree.get(goal_id) {
                Some(goal) if goal.status != *status => {
                    let mut next = tree.clone();
                    if let Some(goal) = next.goals.get_mut(goal_id) {
                        goal.status = *status;
                    }
                    Ok(StatePatch::default().goals(next))
                }
                _ => Ok(StatePatch::default()),
            },
            Syscall::RemoveGoal { goal_id } => {
                let Some(goal) = tree.get(goal_id) else {
                    return Ok(StatePatch::default());
                };
                let mut next = tree.clone();
                for id in tree.subtree(goal_id) {
                    next.goals.shift_remove(&id);
                }
                match goal.parent_id.as_deref().and_then(|parent| next.goals.get_mut(parent)) {
                    Some(parent) => parent.children.retain(|child| child != goal_id),
                    None => next.roots.retain(|root| root != goal_id),
                }
                Ok(StatePatch::default().goals(next))
            }
            _ => Ok(StatePatch::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    fn add(id: &str, parent: Option<&str>, title: &str) -> Syscall {
        Syscall::AddGoal {
            id: Some(id.into()),
            parent_id: parent.map(str::to_string),
            title: title.into(),
        }
    }

    #[test]
    fn builds_a_tree() {
        let mut harness = Harness::new(GoalReducer);
        harness.apply(add("g1", None, "learn"));
        harness.apply(add("g2", Some("g1"), "read"));
        harness.apply(add("g3", Some("g1"), "write"));
        let goals = &harness.state.goals;
        assert_eq!(goals.roots, vec!["g1"]);
        assert_eq!(goals.get("g1").unwrap().children, vec!["g2", "g3"]);
        assert_eq!(goals.subtree("g1"), vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn unknown_parent_and_blank_title_are_rejected() {
        let mut harness = Harness::new(GoalReducer);
        harness.apply(add("g1", Some("missing"), "orphan"));
        harness.apply(add("g2", None, "  "));
        assert!(harness.state.goals.goals.is_empty());
    }

    #[test]
    fn remove_drops_subtree_and_parent_link() {
        let mut harness = Harness::new(GoalReducer);
        harness.apply(add("g1", None, "learn"));
        harness.apply(add("g2", Some("g1"), "read"));
        harness.apply(add("g3", Some("g2"), "chapter one"));
        harness.apply(Syscall::RemoveGoal {
            goal_id: "g2".into(),
        });
        let goals = &harness.state.goals;
        assert_eq!(goals.goals.len(), 1);
        assert!(goals.get("g1").unwrap().children.is_empty());
    }

    #[test]
    fn cyclic_imported_tree_is_removed_once() {
        let mut harness = Harness::new(GoalReducer);
        harness.apply(add("g1", None, "learn"));
        harness.apply(add("g2", Some("g1"), "read"));
        std::sync::Arc::make_mut(&mut harness.state.goals)
            .goals
            .get_mut("g2")
            .unwrap()
            .children
            .push("g1".into());

        assert_eq!(harness.state.goals.subtree("g1"), vec!["g1", "g2"]);
        harness.apply(Syscall::RemoveGoal {
            goal_id: "g1".into(),
        });
        assert!(harness.state.goals.goals.is_empty());
        assert!(harness.state.goals.roots.is_empty());
    }

    #[test]
    fn status_changes_only_when_different() {
        let mut harness = Harness::new(GoalReducer);
        harness.apply(add("g1", None, "learn"));
        harness.apply(Syscall::SetGoalStatus {
            goal_id: "g1".into(),
            status: GoalStatus::Active,
        });
        let before = harness.state.clone();
        harness.apply(Syscall::SetGoalStatus {
            goal_id: "g1".into(),
            status: GoalStatus::Active,
        });
        assert!(std::sync::Arc::ptr_eq(&before.goals, &harness.state.goals));
        assert_eq!(harness.state.goals.get("g1").unwrap().status, GoalStatus::Active);
    }
}
