use amp_protocol::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Negotiation vocabulary exchanged over the signaling side-channel before
/// a data channel opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Connection offer with the caller's supported protocol names.
    Offer {
        session: String,
        protocols: Vec<String>,
    },
    /// Acceptance naming the protocol both sides will speak.
    Answer {
        session: String,
        accepted_protocol: String,
    },
    /// Path candidate for transports that probe connectivity.
    IceCandidate {
        session: String,
        candidate: String,
    },
    /// Negotiation refused.
    Reject {
        session: String,
        reason: String,
    },
}

impl SignalMessage {
    pub fn session(&self) -> &str {
        match self {
            Self::Offer { session, .. }
            | Self::Answer { session, .. }
            | Self::IceCandidate { session, .. }
            | Self::Reject { session, .. } => session,
        }
    }
}

/// Outbound half of the signaling side-channel. How signals travel between
/// nodes is the embedder's concern; the transport manager only needs to
/// address them by node id. Inbound signals arrive on the channel handed
/// to [`crate::TransportManager::run`].
pub trait Signaling: Send + Sync {
    fn send(&self, to: &NodeId, signal: SignalMessage) -> Result<(), TransportError>;
}
