//! Fault layer: classifies topology and consensus anomalies and drives
//! recovery.
//!
//! - Classification: node failure, network partition (gossip-corroborated),
//!   byzantine behavior, performance degradation
//! - Recovery policy: reconnect with exponential backoff then isolate;
//!   reroute through alternates; isolate and flag for review; reroute
//!   non-critical traffic
//! - Every fault is recorded and resolved, never deleted — the audit
//!   trail survives recovery

pub mod backoff;
pub mod coordinator;
pub mod types;

pub use backoff::Backoff;
pub use coordinator::{FaultAction, FaultConfig, FaultCoordinator, FaultSignal};
pub use types::{
    FaultKind, FaultRecord, FaultResolution, PartitionRecord, RecoveryAction, RecoveryOutcome,
    RecoveryStrategy, Severity,
};
