use amp_consensus::ConsensusOutcome;
use amp_fault::{FaultAction, FaultRecord};
use amp_protocol::{NetworkMessage, NodeId};
use serde::Serialize;

/// The outbound application event stream.
///
/// Everything the mesh tells the application is data on this channel;
/// transient peer trouble never surfaces as an error.
#[derive(Debug)]
pub enum MeshEvent {
    PeerConnected { peer: NodeId },
    PeerDisconnected { peer: NodeId },
    MessageReceived { from: NodeId, message: NetworkMessage },
    ConsensusReached(ConsensusOutcome),
    FaultDetected(FaultRecord),
    RecoveryInitiated { action: FaultAction },
    NetworkHealthChanged { score: f64 },
}

/// Synchronous stats snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub peer_count: usize,
    pub connection_count: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub average_latency_ms: f64,
    pub health_score: f64,
    pub uptime_secs: u64,
}
