use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier for a node in the mesh.
///
/// Self-identities are derived from the node's public key as
/// `did:mesh:<hex(sha256(pub_key))>`; identifiers learned from remote
/// peers are treated as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derive a node ID from a public key.
/// Format: did:mesh:<hex(sha256(pub_key))>
pub fn derive_node_id(verifying_key: &VerifyingKey) -> NodeId {
    let hash = Sha256::digest(verifying_key.as_bytes());
    NodeId::new(format!("did:mesh:{}", hex::encode(hash)))
}
