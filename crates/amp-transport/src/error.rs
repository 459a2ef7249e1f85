use amp_protocol::NodeId;
use thiserror::Error;

/// Transport-layer failures.
///
/// Connection errors are reported to the caller of `connect_to_peer` and
/// retried only by the fault coordinator's policy. Remote protocol errors
/// never appear here; they are dropped at ingestion.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to peer {peer}: {reason}")]
    Connect { peer: NodeId, reason: String },

    #[error("connection attempt to {0} timed out")]
    Timeout(NodeId),

    #[error("peer not connected: {0}")]
    NotConnected(NodeId),

    #[error("connection limit reached ({0})")]
    AtCapacity(usize),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("channel error: {0}")]
    Channel(String),
}
