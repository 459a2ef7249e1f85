use amp_protocol::NodeId;
use serde::{Deserialize, Serialize};

/// Transport state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Per-peer transport record. One instance per peer id; a reconnect
/// replaces the record rather than patching it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub peer: NodeId,
    pub status: ConnectionStatus,
    pub latency_ms: Option<u32>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub established_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

impl Connection {
    /// Fresh record for a connection attempt in flight.
    pub fn connecting(peer: NodeId) -> Self {
        Self {
            peer,
            status: ConnectionStatus::Connecting,
            latency_ms: None,
            messages_sent: 0,
            messages_received: 0,
            established_at: None,
            last_activity: chrono::Utc::now(),
        }
    }

    /// Mark the connection established now.
    pub fn establish(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.established_at = Some(chrono::Utc::now());
        self.last_activity = chrono::Utc::now();
    }

    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now();
    }
}
