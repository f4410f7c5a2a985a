//! Architecture proposals and their review status.

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

/// Review status of an architecture proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureStatus {
    /// Awaiting a decision.
    Pending,
    /// Accepted and applied.
    Implemented,
    /// Declined.
    Rejected,
}

/// A proposed structural change to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureProposal {
    /// Proposal id.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Free-form category.
    pub category: String,
    /// Review status.
    pub status: ArchitectureStatus,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Time of the implement/reject decision.
    pub decided_at: Option<DateTime<Utc>>,
    /// Rejection note.
    pub note: Option<String>,
}

/// Architecture sub-record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureRecord {
    /// Proposals in submission order.
    pub proposals: IndexMap<String, ArchitectureProposal>,
}

impl ArchitectureRecord {
    /// Returns `true` if a proposal with this id and title would be accepted.
    #[must_use]
    pub fn admits(&self, id: &str, title: &str) -> bool {
        !id.trim().is_empty() && !title.trim().is_empty() && !self.proposals.contains_key(id)
    }

    /// The proposal, if it is still awaiting a decision.
    #[must_use]
    pub fn pending(&self, id: &str) -> Option<&ArchitectureProposal> {
        self.proposals
            .get(id)
            .filter(|proposal| proposal.status == ArchitectureStatus::Pending)
    }
}

/// Owns the `architecture` sub-record. Version bumps and audit entries for
/// implemented proposals are written by the evolution reducer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchitectureReducer;

impl ArchitectureReducer {
    fn decide(
        ctx: &ReduceContext<'_>,
        record: &ArchitectureRecord,
        command: &Command,
        proposal_id: &str,
        status: ArchitectureStatus,
        note: Option<String>,
    ) -> Result<StatePatch, ReducerError> {
        match record.proposals.get(proposal_id) {
            None => Ok(StatePatch::default()),
            Some(proposal) if proposal.status != ArchitectureStatus::Pending => ctx.reject(
                command,
                format!("proposal '{proposal_id}' is already {:?}", proposal.status),
            ),
            Some(_) => {
                let mut next = record.clone();
                if let Some(proposal) = next.proposals.get_mut(proposal_id) {
                    proposal.status = status;
                    proposal.decided_at = Some(ctx.now);
                    proposal.note = note;
                }
                Ok(StatePatch::default().architecture(next))
            }
        }
    }
}

impl Reducer for ArchitectureReducer {
    fn name(&self) -> &'static str {
        "architecture"
    }

    fn domain(&self) -> &'static [StateKey] {
        &[StateKey::Architecture]
    }

    fn reduce(
        &self,
        ctx: &ReduceContext<'_>,
        state: &WorldState,
        command: &Command,
    ) -> Result<StatePatch, ReducerError> {
        let record = state.architecture.as_ref();
        match &command.syscall {
            Syscall::SubmitArchitectureProposal {
                id,
                title,
                description,
                category,
            } => {
                let id = id.clone().unwrap_or_else(|| ctx.derive_id("arch"));
                if !record.admits(&id, title) {
                    return Ok(StatePatch::default());
                }
                let mut next = record.clone();
                next.proposals.insert(
                    id.clone(),
                    ArchitectureProposal {
                        id,
                        title: title.trim().to_string(),
                        description: description.clone(),
                        category: category.clone(),
                        status: ArchitectureStatus::Pending,
                        submitted_at: ctx.now,
                        decided_at: None,
                        note: None,
                    },
                );
                Ok(StatePatch::default().architecture(next))
            }
            Syscall::ImplementArchitectureProposal { proposal_id } => Self::decide(
                ctx,
                record,
                command,
                proposal_id,
                ArchitectureStatus::Implemented,
                None,
            ),
            Syscall::RejectArchitectureProposal {
                proposal_id,
                reason,
            } => Self::decide(
                ctx,
                record,
                command,
                proposal_id,
                ArchitectureStatus::Rejected,
                Some(reason.clone()).filter(|reason| !reason.is_empty()),
            ),
            _ => Ok(StatePatch::default()),
        }
    }
}
