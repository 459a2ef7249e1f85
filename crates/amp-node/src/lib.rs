//! The AMP mesh node: wires transport, topology, consensus, and fault
//! recovery into one explicitly constructed coordinator.
//!
//! Data flows bottom-up (transport events → topology → consensus → fault
//! detection); control flows top-down (fault decisions issue transport
//! and consensus commands). There is no process-wide singleton: a
//! [`MeshNode`] is built from a validated [`NodeConfig`], started, and
//! torn down with an explicit `shutdown()`.

pub mod config;
pub mod error;
pub mod events;
pub mod node;

pub use config::NodeConfig;
pub use error::NodeError;
pub use events::{MeshEvent, NetworkStats};
pub use node::MeshNode;
