use serde::{Deserialize, Serialize};

use crate::agent::AgentDescriptor;
use crate::identity::NodeId;

/// A coordination transaction to be ordered and committed by the
/// consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub submitted_by: NodeId,
    /// Opaque signature over the transaction body.
    pub signature: String,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl Transaction {
    pub fn new(kind: TransactionKind, submitted_by: NodeId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            submitted_by,
            signature: String::new(),
            submitted_at: chrono::Utc::now(),
        }
    }

    /// Canonical bytes covered by the transaction signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let canonical = serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "submitted_by": self.submitted_by,
        });
        serde_json::to_vec(&canonical).unwrap_or_default()
    }
}

/// The coordination operations nodes agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum TransactionKind {
    SpawnAgent { agent: AgentDescriptor },
    TerminateAgent { agent_id: String },
    AssignTask { agent_id: String, task_id: String },
}

/// A leader's proposal: an ordered batch of transactions for one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub epoch: u64,
    pub proposer: NodeId,
    pub transactions: Vec<Transaction>,
}

impl Proposal {
    pub fn new(epoch: u64, proposer: NodeId, transactions: Vec<Transaction>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            proposer,
            transactions,
        }
    }
}

/// Consensus wire payload, carried inside a `NetworkMessage` of kind
/// `Consensus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConsensusPayload {
    Proposal(Proposal),
    Vote {
        epoch: u64,
        proposal_id: String,
        voter: NodeId,
        accept: bool,
    },
    Commit {
        epoch: u64,
        proposal_id: String,
    },
    Abort {
        epoch: u64,
        proposal_id: String,
        reason: String,
    },
}

impl ConsensusPayload {
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Proposal(p) => p.epoch,
            Self::Vote { epoch, .. }
            | Self::Commit { epoch, .. }
            | Self::Abort { epoch, .. } => *epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_payload_wire_tags() {
        let vote = ConsensusPayload::Vote {
            epoch: 3,
            proposal_id: "p1".into(),
            voter: NodeId::new("node-b"),
            accept: true,
        };
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["type"], "vote");
        assert_eq!(json["epoch"], 3);

        let decoded: ConsensusPayload = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.epoch(), 3);
    }

    #[test]
    fn test_transaction_signing_payload_is_stable() {
        let tx = Transaction::new(
            TransactionKind::TerminateAgent {
                agent_id: "agent-1".into(),
            },
            NodeId::new("node-a"),
        );
        assert_eq!(tx.signing_payload(), tx.signing_payload());
    }
}
