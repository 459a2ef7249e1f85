use std::collections::HashMap;

use amp_protocol::{NodeId, Proposal};

/// Phase of the active epoch. Epoch numbers only move forward; a retired
/// epoch's messages are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    /// No round in flight.
    Idle,
    /// Waiting for the leader's proposal.
    Proposing,
    /// Proposal received, collecting votes.
    Voting,
    /// Quorum reached, commit in flight.
    Committing,
    /// Round committed.
    Committed,
    /// Round aborted (timeout or blocking minority).
    Aborted,
}

/// Per-epoch consensus state.
#[derive(Debug)]
pub struct EpochState {
    pub number: u64,
    pub leader: Option<NodeId>,
    pub phase: EpochPhase,
    /// The round's outstanding proposal.
    pub proposal: Option<Proposal>,
    /// Vote tally per proposal id: voter → accept.
    pub votes: HashMap<String, HashMap<NodeId, bool>>,
    pub deadline: chrono::DateTime<chrono::Utc>,
}

impl EpochState {
    pub fn initial() -> Self {
        Self {
            number: 0,
            leader: None,
            phase: EpochPhase::Idle,
            proposal: None,
            votes: HashMap::new(),
            deadline: chrono::Utc::now(),
        }
    }

    /// Tally for a proposal: (affirmative, negative).
    pub fn tally(&self, proposal_id: &str) -> (usize, usize) {
        match self.votes.get(proposal_id) {
            Some(votes) => {
                let yes = votes.values().filter(|v| **v).count();
                (yes, votes.len() - yes)
            }
            None => (0, 0),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            EpochPhase::Idle | EpochPhase::Committed | EpochPhase::Aborted
        )
    }
}
