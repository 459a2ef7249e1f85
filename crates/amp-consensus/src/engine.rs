//! The shared state-machine driver for all consensus algorithms.
//!
//! The engine is a pure state machine: the embedding node feeds it
//! submissions, inbound payloads, and clock ticks, and executes the
//! actions it returns (broadcasts, outcomes, suspicion reports). Keeping
//! I/O out of the engine makes every path testable without a network.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use amp_protocol::{ConsensusPayload, NodeId, Proposal, Signer, Transaction};
use serde::{Deserialize, Serialize};

use crate::algorithm::{algorithm_by_name, ConsensusAlgorithm};
use crate::epoch::{EpochPhase, EpochState};
use crate::error::ConsensusError;

#[derive(Clone)]
pub struct ConsensusConfig {
    /// Validator set, expected to include the local node.
    pub validators: Vec<NodeId>,
    /// Quorum ratio; default is more than 2/3 of validators.
    pub bft_ratio: f64,
    /// Deadline for a full propose/vote round.
    pub epoch_timeout: std::time::Duration,
    /// How long a follower waits for the leader's proposal.
    pub leader_proposal_timeout: std::time::Duration,
    /// Algorithm name: "raft" (default) or "pbft".
    pub algorithm: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            validators: Vec::new(),
            bft_ratio: 2.0 / 3.0,
            epoch_timeout: std::time::Duration::from_secs(30),
            leader_proposal_timeout: std::time::Duration::from_secs(10),
            algorithm: "raft".to_string(),
        }
    }
}

/// What the embedding node must do after driving the engine.
#[derive(Debug)]
pub enum ConsensusAction {
    /// Send this payload to all validators.
    Broadcast(ConsensusPayload),
    /// Surface this outcome to the application.
    Outcome(ConsensusOutcome),
    /// Report misbehavior to the fault coordinator.
    Suspect { peer: NodeId, reason: String },
}

/// Terminal result for a transaction, the only consensus surface the
/// application ever sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusOutcome {
    Committed {
        transaction: Transaction,
        epoch: u64,
        height: u64,
    },
    Aborted {
        transaction_id: String,
        epoch: u64,
        reason: String,
    },
}

/// One entry of the append-only committed log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub transaction: Transaction,
    pub epoch: u64,
    pub height: u64,
}

pub struct ConsensusEngine {
    local: NodeId,
    config: ConsensusConfig,
    algorithm: Box<dyn ConsensusAlgorithm>,
    signer: Arc<dyn Signer>,
    epoch: EpochState,
    /// Transactions waiting for the next proposal round.
    queue: VecDeque<Transaction>,
    /// Ids queued or in an outstanding proposal. Disjoint from
    /// `committed_ids` at all times.
    pending_ids: HashSet<String>,
    committed_ids: HashSet<String>,
    committed_log: Vec<CommittedEntry>,
}

impl ConsensusEngine {
    pub fn new(
        local: NodeId,
        config: ConsensusConfig,
        signer: Arc<dyn Signer>,
    ) -> Result<Self, ConsensusError> {
        if !(config.bft_ratio > 0.5 && config.bft_ratio <= 1.0) {
            return Err(ConsensusError::InvalidConfig(format!(
                "bft_ratio {} must be in (0.5, 1.0]",
                config.bft_ratio
            )));
        }
        if config.validators.is_empty() {
            return Err(ConsensusError::InvalidConfig(
                "validator set is empty".into(),
            ));
        }
        if !config.validators.contains(&local) {
            return Err(ConsensusError::NotValidator(local.to_string()));
        }
        let algorithm = algorithm_by_name(&config.algorithm)?;
        Ok(Self {
            local,
            config,
            algorithm,
            signer,
            epoch: EpochState::initial(),
            queue: VecDeque::new(),
            pending_ids: HashSet::new(),
            committed_ids: HashSet::new(),
            committed_log: Vec::new(),
        })
    }

    /// Queue a transaction for the next proposal round.
    ///
    /// Idempotent: a transaction already pending or committed is accepted
    /// as a no-op (`Ok(false)`). An invalid signature is an error to the
    /// submitting caller — this is the local API surface, not ingestion.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<bool, ConsensusError> {
        if !self
            .signer
            .verify(&tx.submitted_by, &tx.signing_payload(), &tx.signature)
        {
            return Err(ConsensusError::InvalidSignature(tx.submitted_by.to_string()));
        }
        if self.pending_ids.contains(&tx.id) || self.committed_ids.contains(&tx.id) {
            return Ok(false);
        }
        tracing::debug!(tx = %tx.id, "transaction queued");
        self.pending_ids.insert(tx.id.clone());
        self.queue.push_back(tx);
        Ok(true)
    }

    /// Start the next round if nothing is in flight and work is queued.
    pub fn maybe_start_round(
        &mut self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ConsensusAction> {
        if !self.epoch.is_terminal() || self.queue.is_empty() {
            return Vec::new();
        }
        self.begin_epoch(self.epoch.number + 1, now)
    }

    fn begin_epoch(&mut self, number: u64, now: chrono::DateTime<chrono::Utc>) -> Vec<ConsensusAction> {
        let leader = self.algorithm.leader_for(number, &self.config.validators);
        self.epoch = EpochState {
            number,
            leader: leader.clone(),
            phase: EpochPhase::Proposing,
            proposal: None,
            votes: Default::default(),
            deadline: now + to_chrono(self.config.leader_proposal_timeout),
        };

        let Some(leader) = leader else {
            self.epoch.phase = EpochPhase::Idle;
            return Vec::new();
        };
        tracing::debug!(epoch = number, leader = %leader, "epoch started");
        if leader != self.local {
            // Follower: wait for the leader's proposal or its timeout.
            return Vec::new();
        }

        let transactions: Vec<Transaction> = self.queue.drain(..).collect();
        let proposal = Proposal::new(number, self.local.clone(), transactions);
        self.epoch.deadline = now + to_chrono(self.config.epoch_timeout);
        self.epoch.phase = EpochPhase::Voting;
        self.epoch
            .votes
            .entry(proposal.id.clone())
            .or_default()
            .insert(self.local.clone(), true);
        let proposal_id = proposal.id.clone();
        self.epoch.proposal = Some(proposal.clone());

        tracing::info!(
            epoch = number,
            proposal = %proposal_id,
            transactions = proposal.transactions.len(),
            "proposing as leader"
        );
        let mut actions = vec![ConsensusAction::Broadcast(ConsensusPayload::Proposal(
            proposal,
        ))];
        actions.extend(self.check_tally(&proposal_id));
        actions
    }

    /// Drive the state machine with an inbound consensus payload.
    pub fn handle_message(
        &mut self,
        from: &NodeId,
        payload: ConsensusPayload,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ConsensusAction> {
        match payload {
            ConsensusPayload::Proposal(proposal) => self.handle_proposal(from, proposal, now),
            ConsensusPayload::Vote {
                epoch,
                proposal_id,
                voter,
                accept,
            } => self.handle_vote(from, epoch, proposal_id, voter, accept),
            ConsensusPayload::Commit { epoch, proposal_id } => {
                self.handle_commit(from, epoch, &proposal_id)
            }
            ConsensusPayload::Abort {
                epoch,
                proposal_id,
                reason,
            } => self.handle_abort(from, epoch, &proposal_id, &reason),
        }
    }

    fn handle_proposal(
        &mut self,
        from: &NodeId,
        proposal: Proposal,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ConsensusAction> {
        if proposal.proposer != *from {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "proposal proposer does not match sender".into(),
            }];
        }
        if !self.config.validators.contains(&proposal.proposer) {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "proposal from non-validator".into(),
            }];
        }
        let expected = self
            .algorithm
            .leader_for(proposal.epoch, &self.config.validators);
        if expected.as_ref() != Some(&proposal.proposer) {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: format!("proposal for epoch {} from non-leader", proposal.epoch),
            }];
        }

        // Epochs only move forward.
        if proposal.epoch < self.epoch.number
            || (proposal.epoch == self.epoch.number && self.epoch.phase != EpochPhase::Proposing)
        {
            tracing::debug!(epoch = proposal.epoch, "stale proposal ignored");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if proposal.epoch > self.epoch.number {
            if self.epoch.proposal.is_some() {
                actions.extend(self.abort_round("superseded by newer epoch"));
            }
            self.epoch.votes.clear();
        }

        self.epoch.number = proposal.epoch;
        self.epoch.leader = expected;
        self.epoch.phase = EpochPhase::Voting;
        self.epoch.deadline = now + to_chrono(self.config.epoch_timeout);

        let accept = self.algorithm.evaluate(&proposal, &self.committed_ids);
        if accept {
            for tx in &proposal.transactions {
                self.pending_ids.insert(tx.id.clone());
            }
        }
        self.epoch
            .votes
            .entry(proposal.id.clone())
            .or_default()
            .insert(self.local.clone(), accept);
        let proposal_id = proposal.id.clone();
        self.epoch.proposal = Some(proposal);

        tracing::debug!(epoch = self.epoch.number, proposal = %proposal_id, accept, "voting");
        actions.push(ConsensusAction::Broadcast(ConsensusPayload::Vote {
            epoch: self.epoch.number,
            proposal_id: proposal_id.clone(),
            voter: self.local.clone(),
            accept,
        }));
        actions.extend(self.check_tally(&proposal_id));
        actions
    }

    fn handle_vote(
        &mut self,
        from: &NodeId,
        epoch: u64,
        proposal_id: String,
        voter: NodeId,
        accept: bool,
    ) -> Vec<ConsensusAction> {
        if voter != *from {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "vote voter does not match sender".into(),
            }];
        }
        if !self.config.validators.contains(&voter) {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "vote from non-validator".into(),
            }];
        }
        if epoch != self.epoch.number
            || !matches!(self.epoch.phase, EpochPhase::Voting | EpochPhase::Committing)
        {
            return Vec::new();
        }
        let Some(proposal) = &self.epoch.proposal else {
            return Vec::new();
        };
        if proposal.id != proposal_id {
            return Vec::new();
        }

        let votes = self.epoch.votes.entry(proposal_id.clone()).or_default();
        match votes.get(&voter) {
            Some(previous) if *previous != accept => {
                return vec![ConsensusAction::Suspect {
                    peer: voter,
                    reason: "conflicting votes in one epoch".into(),
                }];
            }
            Some(_) => return Vec::new(), // duplicate vote, first one stands
            None => {
                votes.insert(voter.clone(), accept);
            }
        }
        tracing::debug!(epoch, proposal = %proposal_id, voter = %voter, accept, "vote recorded");
        self.check_tally(&proposal_id)
    }

    fn handle_commit(
        &mut self,
        from: &NodeId,
        epoch: u64,
        proposal_id: &str,
    ) -> Vec<ConsensusAction> {
        if epoch != self.epoch.number {
            return Vec::new();
        }
        if self.epoch.leader.as_ref() != Some(from) {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "commit from non-leader".into(),
            }];
        }
        let current = self
            .epoch
            .proposal
            .as_ref()
            .is_some_and(|p| p.id == proposal_id);
        if current
            && matches!(self.epoch.phase, EpochPhase::Voting | EpochPhase::Committing)
        {
            return self.commit_current();
        }
        Vec::new()
    }

    fn handle_abort(
        &mut self,
        from: &NodeId,
        epoch: u64,
        proposal_id: &str,
        reason: &str,
    ) -> Vec<ConsensusAction> {
        if epoch != self.epoch.number {
            return Vec::new();
        }
        if self.epoch.leader.as_ref() != Some(from) {
            return vec![ConsensusAction::Suspect {
                peer: from.clone(),
                reason: "abort from non-leader".into(),
            }];
        }
        let current = self
            .epoch
            .proposal
            .as_ref()
            .is_some_and(|p| p.id == proposal_id);
        if current && !self.epoch.is_terminal() {
            return self.abort_round(reason);
        }
        Vec::new()
    }

    /// Drive deadlines. Call on a fixed schedule.
    pub fn tick(&mut self, now: chrono::DateTime<chrono::Utc>) -> Vec<ConsensusAction> {
        match self.epoch.phase {
            EpochPhase::Voting | EpochPhase::Committing if now >= self.epoch.deadline => {
                tracing::warn!(epoch = self.epoch.number, "epoch timeout, aborting round");
                self.abort_round("epoch timeout")
            }
            EpochPhase::Proposing if now >= self.epoch.deadline => {
                tracing::warn!(
                    epoch = self.epoch.number,
                    leader = ?self.epoch.leader,
                    "leader failed to propose, forcing re-election"
                );
                self.epoch.phase = EpochPhase::Aborted;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn check_tally(&mut self, proposal_id: &str) -> Vec<ConsensusAction> {
        let quorum = self
            .algorithm
            .quorum(self.config.validators.len(), self.config.bft_ratio);
        let (yes, no) = self.epoch.tally(proposal_id);
        if yes >= quorum {
            return self.commit_current();
        }
        if self.config.validators.len().saturating_sub(no) < quorum {
            tracing::warn!(
                epoch = self.epoch.number,
                yes,
                no,
                quorum,
                "blocking minority, aborting round"
            );
            return self.abort_round("blocking minority");
        }
        Vec::new()
    }

    fn commit_current(&mut self) -> Vec<ConsensusAction> {
        let Some(proposal) = self.epoch.proposal.take() else {
            return Vec::new();
        };
        self.epoch.phase = EpochPhase::Committing;

        let mut actions = Vec::new();
        if self.epoch.leader.as_ref() == Some(&self.local) {
            actions.push(ConsensusAction::Broadcast(ConsensusPayload::Commit {
                epoch: self.epoch.number,
                proposal_id: proposal.id.clone(),
            }));
        }
        for tx in proposal.transactions {
            // Commit is terminal per id; a replay can never enter the log.
            if self.committed_ids.insert(tx.id.clone()) {
                self.pending_ids.remove(&tx.id);
                let height = self.committed_log.len() as u64 + 1;
                tracing::info!(tx = %tx.id, epoch = self.epoch.number, height, "transaction committed");
                self.committed_log.push(CommittedEntry {
                    transaction: tx.clone(),
                    epoch: self.epoch.number,
                    height,
                });
                actions.push(ConsensusAction::Outcome(ConsensusOutcome::Committed {
                    transaction: tx,
                    epoch: self.epoch.number,
                    height,
                }));
            }
        }
        self.epoch.phase = EpochPhase::Committed;
        actions
    }

    fn abort_round(&mut self, reason: &str) -> Vec<ConsensusAction> {
        let mut actions = Vec::new();
        if let Some(proposal) = self.epoch.proposal.take() {
            if self.epoch.leader.as_ref() == Some(&self.local) {
                actions.push(ConsensusAction::Broadcast(ConsensusPayload::Abort {
                    epoch: self.epoch.number,
                    proposal_id: proposal.id.clone(),
                    reason: reason.to_string(),
                }));
            }
            for tx in proposal.transactions {
                self.pending_ids.remove(&tx.id);
                actions.push(ConsensusAction::Outcome(ConsensusOutcome::Aborted {
                    transaction_id: tx.id,
                    epoch: self.epoch.number,
                    reason: reason.to_string(),
                }));
            }
        }
        self.epoch.phase = EpochPhase::Aborted;
        actions
    }

    /// Remove a validator (byzantine isolation). Quorum shrinks with the
    /// set; the round in flight is left to its deadline.
    pub fn remove_validator(&mut self, peer: &NodeId) {
        let before = self.config.validators.len();
        self.config.validators.retain(|v| v != peer);
        if self.config.validators.len() != before {
            tracing::warn!(peer = %peer, "validator removed from set");
        }
    }

    pub fn validators(&self) -> &[NodeId] {
        &self.config.validators
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.number
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.epoch.leader.clone()
    }

    pub fn phase(&self) -> EpochPhase {
        self.epoch.phase
    }

    pub fn committed_log(&self) -> &[CommittedEntry] {
        &self.committed_log
    }

    pub fn is_committed(&self, tx_id: &str) -> bool {
        self.committed_ids.contains(tx_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_ids.len()
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(30))
}
