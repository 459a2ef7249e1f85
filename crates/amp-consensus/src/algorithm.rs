//! The pluggable algorithm contract.
//!
//! An algorithm answers three questions: who leads an epoch, whether a
//! proposal is acceptable against local state, and how many affirmative
//! votes commit. The shared state-machine driver in [`crate::engine`]
//! does everything else, so new algorithms implement exactly this trait.

use std::collections::HashSet;

use amp_protocol::{NodeId, Proposal};

use crate::error::ConsensusError;

pub trait ConsensusAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Leader for an epoch, `None` when the validator set is empty.
    fn leader_for(&self, epoch: u64, validators: &[NodeId]) -> Option<NodeId>;

    /// Evaluate a proposal against local state. `committed` is the set of
    /// already-committed transaction ids.
    fn evaluate(&self, proposal: &Proposal, committed: &HashSet<String>) -> bool;

    /// Affirmative votes required to commit.
    fn quorum(&self, validator_count: usize, bft_ratio: f64) -> usize;
}

/// Look up an algorithm by its configured name.
pub fn algorithm_by_name(name: &str) -> Result<Box<dyn ConsensusAlgorithm>, ConsensusError> {
    match name {
        "raft" => Ok(Box::new(RotationAlgorithm)),
        "pbft" => Ok(Box::new(PbftAlgorithm)),
        other => Err(ConsensusError::UnknownAlgorithm(other.to_string())),
    }
}

fn sorted_validators(validators: &[NodeId]) -> Vec<NodeId> {
    let mut sorted = validators.to_vec();
    sorted.sort();
    sorted
}

fn no_replayed_transactions(proposal: &Proposal, committed: &HashSet<String>) -> bool {
    proposal.transactions.iter().all(|tx| !committed.contains(&tx.id))
}

/// Default algorithm: deterministic round-robin leader rotation over the
/// sorted validator set, quorum at more than `bft_ratio` of validators.
pub struct RotationAlgorithm;

impl ConsensusAlgorithm for RotationAlgorithm {
    fn name(&self) -> &'static str {
        "raft"
    }

    fn leader_for(&self, epoch: u64, validators: &[NodeId]) -> Option<NodeId> {
        let sorted = sorted_validators(validators);
        if sorted.is_empty() {
            return None;
        }
        let index = (epoch % sorted.len() as u64) as usize;
        Some(sorted[index].clone())
    }

    fn evaluate(&self, proposal: &Proposal, committed: &HashSet<String>) -> bool {
        no_replayed_transactions(proposal, committed)
    }

    fn quorum(&self, validator_count: usize, bft_ratio: f64) -> usize {
        // Strictly more than ratio·n votes. The epsilon keeps exact
        // fractions like 3 · (2/3) from landing just below their integer.
        let quorum = (validator_count as f64 * bft_ratio + 1e-9).floor() as usize + 1;
        quorum.min(validator_count.max(1))
    }
}

/// PBFT-family algorithm honoring the same contract. The primary rotates
/// like the default algorithm; quorum is the classic `2f + 1` with
/// `f = (n - 1) / 3`. Full three-phase message flow is not implemented;
/// the shared driver's propose/vote/commit round stands in for it.
pub struct PbftAlgorithm;

impl ConsensusAlgorithm for PbftAlgorithm {
    fn name(&self) -> &'static str {
        "pbft"
    }

    fn leader_for(&self, epoch: u64, validators: &[NodeId]) -> Option<NodeId> {
        RotationAlgorithm.leader_for(epoch, validators)
    }

    fn evaluate(&self, proposal: &Proposal, committed: &HashSet<String>) -> bool {
        no_replayed_transactions(proposal, committed)
    }

    fn quorum(&self, validator_count: usize, _bft_ratio: f64) -> usize {
        let f = validator_count.saturating_sub(1) / 3;
        (2 * f + 1).min(validator_count.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(*n)).collect()
    }

    #[test]
    fn test_rotation_is_deterministic_over_sorted_set() {
        let algo = RotationAlgorithm;
        // Same set in different orders elects the same leaders.
        let a = validators(&["n2", "n0", "n1"]);
        let b = validators(&["n0", "n1", "n2"]);
        for epoch in 0..6 {
            assert_eq!(algo.leader_for(epoch, &a), algo.leader_for(epoch, &b));
        }
        assert_eq!(algo.leader_for(0, &a), Some(NodeId::new("n0")));
        assert_eq!(algo.leader_for(1, &a), Some(NodeId::new("n1")));
        assert_eq!(algo.leader_for(3, &a), Some(NodeId::new("n0")));
    }

    #[test]
    fn test_quorum_from_bft_ratio() {
        let algo = RotationAlgorithm;
        // 4 validators at ratio 2/3: more than 2/3 means 3 votes.
        assert_eq!(algo.quorum(4, 2.0 / 3.0), 3);
        assert_eq!(algo.quorum(3, 2.0 / 3.0), 3);
        assert_eq!(algo.quorum(7, 2.0 / 3.0), 5);
        assert_eq!(algo.quorum(1, 2.0 / 3.0), 1);
    }

    #[test]
    fn test_pbft_quorum() {
        let algo = PbftAlgorithm;
        assert_eq!(algo.quorum(4, 2.0 / 3.0), 3); // f = 1
        assert_eq!(algo.quorum(7, 2.0 / 3.0), 5); // f = 2
        assert_eq!(algo.quorum(1, 2.0 / 3.0), 1);
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        assert!(algorithm_by_name("raft").is_ok());
        assert!(algorithm_by_name("pbft").is_ok());
        assert!(matches!(
            algorithm_by_name("paxos-deluxe"),
            Err(ConsensusError::UnknownAlgorithm(_))
        ));
    }
}
