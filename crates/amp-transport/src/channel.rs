use amp_protocol::NodeId;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// An open bidirectional data channel to one peer.
///
/// Sends are bounded by the channel buffer, not by I/O completion; a send
/// on a closed channel fails immediately and is never queued.
pub trait PeerChannel: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;
    fn close(&self);
}

/// Opens the data channel for a negotiated session.
///
/// Both endpoints call `open` with the same session id once negotiation
/// completes; the transport wires the two ends together. Returns the send
/// half and the inbound byte stream for the peer.
pub trait ChannelOpener: Send + Sync {
    fn open(
        &self,
        peer: &NodeId,
        session: &str,
    ) -> Result<(Box<dyn PeerChannel>, mpsc::UnboundedReceiver<Vec<u8>>), TransportError>;
}
