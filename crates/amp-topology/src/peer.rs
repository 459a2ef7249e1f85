use amp_protocol::{AgentDescriptor, HeartbeatPayload, NodeId};
use serde::{Deserialize, Serialize};

/// Live metadata gossiped by a peer, refreshed on every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub agents: Vec<AgentDescriptor>,
    pub cpu_load: f64,
    pub memory_load: f64,
    pub latency_ms: Option<u32>,
    pub capabilities: Vec<String>,
    /// Open connections the peer reports holding (mesh density input).
    pub link_count: u32,
    /// Peers the peer reports reaching (partition-detection input).
    pub reachable: Vec<NodeId>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl Default for PeerMetadata {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            cpu_load: 0.0,
            memory_load: 0.0,
            latency_ms: None,
            capabilities: Vec::new(),
            link_count: 0,
            reachable: Vec::new(),
            last_seen: chrono::Utc::now(),
        }
    }
}

/// A known peer. At most one entry exists per peer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub addresses: Vec<String>,
    pub protocols: Vec<String>,
    pub metadata: PeerMetadata,
}

impl PeerInfo {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            addresses: Vec::new(),
            protocols: Vec::new(),
            metadata: PeerMetadata::default(),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.metadata.agents.len()
    }

    /// Fold a heartbeat into the metadata block.
    pub fn apply_heartbeat(&mut self, heartbeat: &HeartbeatPayload) {
        self.addresses = heartbeat.addresses.clone();
        self.protocols = heartbeat.protocols.clone();
        self.metadata.agents = heartbeat.agents.clone();
        self.metadata.cpu_load = heartbeat.cpu_load;
        self.metadata.memory_load = heartbeat.memory_load;
        self.metadata.capabilities = heartbeat.capabilities.clone();
        self.metadata.link_count = heartbeat.link_count;
        self.metadata.reachable = heartbeat.reachable.clone();
        self.metadata.last_seen = chrono::Utc::now();
    }
}
