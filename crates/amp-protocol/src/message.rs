use serde::{Deserialize, Serialize};

use crate::agent::AgentDescriptor;
use crate::error::ProtocolError;
use crate::identity::NodeId;

/// Default relay budget for broadcast messages.
pub const DEFAULT_TTL: u32 = 8;

/// Wire protocol name offered during channel negotiation.
pub const PROTOCOL_NAME: &str = "amp/1.0.0";

/// Kind of a network message, routed to the matching subsystem on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Best-effort fan-out to every connected peer.
    Broadcast,
    /// Addressed to a single peer.
    Direct,
    /// Consensus engine traffic (proposals, votes, commits, aborts).
    Consensus,
    /// Periodic liveness + metadata refresh.
    Heartbeat,
    /// Application-level agent coordination.
    AgentCoordination,
}

/// Top-level message envelope. Immutable once sent; relaying produces a
/// hop-incremented copy via [`NetworkMessage::relayed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub id: String,
    pub kind: MessageKind,
    pub source: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<NodeId>,
    pub payload: serde_json::Value,
    /// Opaque signature produced by the configured signer.
    pub signature: String,
    pub hop: u32,
    pub ttl: u32,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl NetworkMessage {
    /// Create an unsigned message with a fresh id and zero hops.
    pub fn new(kind: MessageKind, source: NodeId, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source,
            destination: None,
            payload,
            signature: String::new(),
            hop: 0,
            ttl: DEFAULT_TTL,
            sent_at: chrono::Utc::now(),
        }
    }

    /// Create a message addressed to a single peer.
    pub fn direct(source: NodeId, destination: NodeId, payload: serde_json::Value) -> Self {
        let mut msg = Self::new(MessageKind::Direct, source, payload);
        msg.destination = Some(destination);
        msg
    }

    /// The canonical bytes covered by the signature: everything except the
    /// signature itself and the mutable relay counter.
    pub fn signing_payload(&self) -> Vec<u8> {
        let canonical = serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "source": self.source,
            "destination": self.destination,
            "payload": self.payload,
            "ttl": self.ttl,
        });
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    /// Whether the relay budget is exhausted.
    pub fn expired(&self) -> bool {
        self.hop >= self.ttl
    }

    /// Hop-incremented copy for relaying, or `None` once the budget is spent.
    pub fn relayed(&self) -> Option<Self> {
        if self.expired() {
            return None;
        }
        let mut copy = self.clone();
        copy.hop += 1;
        Some(copy)
    }

    /// Serialize the envelope for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Deserialize an envelope received from a peer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Heartbeat payload: the metadata block every node gossips about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Agents currently registered on the sending node.
    pub agents: Vec<AgentDescriptor>,
    pub cpu_load: f64,
    pub memory_load: f64,
    /// Capability tags advertised by the sending node.
    pub capabilities: Vec<String>,
    /// Addresses the sender accepts signaling on.
    pub addresses: Vec<String>,
    /// Protocols the sender speaks.
    pub protocols: Vec<String>,
    /// Number of open connections the sender holds (mesh density input).
    pub link_count: u32,
    /// Peers the sender can currently reach (partition-detection input).
    pub reachable: Vec<NodeId>,
}

/// Directed or network-wide agent placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnDirective {
    pub config: serde_json::Value,
    pub requested_by: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_broadcast(ttl: u32) -> NetworkMessage {
        let mut msg = NetworkMessage::new(
            MessageKind::Broadcast,
            NodeId::new("node-a"),
            serde_json::json!({"hello": "mesh"}),
        );
        msg.ttl = ttl;
        msg
    }

    #[test]
    fn test_relay_consumes_ttl_budget() {
        let mut msg = make_broadcast(3);
        for _ in 0..3 {
            msg = msg.relayed().expect("budget not yet spent");
        }
        assert_eq!(msg.hop, msg.ttl);
        assert!(msg.expired());
        assert!(msg.relayed().is_none(), "message must drop on the next hop");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let msg = make_broadcast(4);
        let decoded = NetworkMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.kind, MessageKind::Broadcast);
        assert_eq!(decoded.source, msg.source);
    }

    #[test]
    fn test_malformed_envelope_is_an_error_not_a_panic() {
        let result = NetworkMessage::from_bytes(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_signing_payload_excludes_hop_counter() {
        let msg = make_broadcast(4);
        let relayed = msg.relayed().unwrap();
        assert_eq!(msg.signing_payload(), relayed.signing_payload());
    }
}
