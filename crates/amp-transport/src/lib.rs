//! Peer transport layer: one logical connection per peer.
//!
//! - Capability negotiation (offer/answer/ice-candidate) over a pluggable
//!   signaling side-channel
//! - Per-peer data channels behind the `PeerChannel` trait
//! - Idempotent connect, best-effort broadcast fan-out, single-shot direct
//!   sends
//! - Hardened inbound pump: malformed, unsigned, stale, or duplicate
//!   envelopes become logged drops, never faults
//! - In-process `MemoryHub` transport for tests and loopback nodes

pub mod channel;
pub mod connection;
pub mod error;
pub mod manager;
pub mod memory;
pub mod signaling;

pub use channel::{ChannelOpener, PeerChannel};
pub use connection::{Connection, ConnectionStatus};
pub use error::TransportError;
pub use manager::{TransportConfig, TransportEvent, TransportManager};
pub use memory::{MemoryEndpoint, MemoryHub};
pub use signaling::{SignalMessage, Signaling};
