//! Mesh topology layer: the authoritative, eventually-consistent view of
//! the network.
//!
//! - Peer map refreshed by heartbeats and discovery events
//! - Staleness: two missed heartbeats marks a peer stale, one further
//!   interval of silence evicts it
//! - Aggregates: mesh density from gossiped link counts, average latency,
//!   and a health score that degrades instantly and recovers smoothly
//! - Snapshots are rebuilt and swapped wholesale, never patched in place

pub mod health;
pub mod manager;
pub mod peer;

pub use health::{HealthTracker, FAILURE_PENALTY, SMOOTHING_ALPHA};
pub use manager::{NetworkTopology, TopologyConfig, TopologyEvent, TopologyManager};
pub use peer::{PeerInfo, PeerMetadata};
