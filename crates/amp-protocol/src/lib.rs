//! AMP Protocol - Core types and message definitions
//!
//! Implements the Agent Mesh Protocol (AMP) wire format: JSON envelopes
//! with hop/TTL relay budgets, Ed25519 signatures, and the coordination
//! transaction vocabulary shared by every node in the mesh.

pub mod agent;
pub mod consensus;
pub mod dedup;
pub mod error;
pub mod identity;
pub mod message;
pub mod signer;

pub use agent::*;
pub use consensus::*;
pub use dedup::*;
pub use error::*;
pub use identity::*;
pub use message::*;
pub use signer::{Ed25519Signer, NullSigner, Signer};
