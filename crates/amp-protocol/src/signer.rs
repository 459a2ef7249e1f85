use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};

use crate::error::ProtocolError;
use crate::identity::{derive_node_id, NodeId};

/// Pluggable message signer.
///
/// Verification failure is a boolean, never an error: a bad signature from
/// a remote peer is dropped at ingestion and must not surface as a fault.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> String;
    fn verify(&self, source: &NodeId, payload: &[u8], signature: &str) -> bool;
}

/// Default Ed25519 signer. Signatures are hex-encoded; peer public keys
/// are registered as they are learned (handshake / heartbeat).
pub struct Ed25519Signer {
    signing_key: SigningKey,
    known_keys: RwLock<HashMap<NodeId, VerifyingKey>>,
}

impl Ed25519Signer {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            known_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Load the identity key from a file, or create a new one if the file
    /// doesn't exist. The file stores the raw 32-byte Ed25519 seed with
    /// mode 0600.
    pub fn load_or_create(path: &Path) -> Result<Self, ProtocolError> {
        if path.exists() {
            let seed_bytes = std::fs::read(path)
                .map_err(|e| ProtocolError::Crypto(format!("read key file: {e}")))?;
            let seed: [u8; 32] = seed_bytes.as_slice().try_into().map_err(|_| {
                ProtocolError::Crypto(format!(
                    "key file is {} bytes, expected 32",
                    seed_bytes.len()
                ))
            })?;
            Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ProtocolError::Crypto(format!("create dir: {e}")))?;
            }
            let signer = Self::generate();
            std::fs::write(path, signer.signing_key.to_bytes())
                .map_err(|e| ProtocolError::Crypto(format!("write key file: {e}")))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    .map_err(|e| ProtocolError::Crypto(format!("set permissions: {e}")))?;
            }
            Ok(signer)
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The node ID derived from this signer's public key.
    pub fn node_id(&self) -> NodeId {
        derive_node_id(&self.verifying_key())
    }

    /// Register a peer's public key (hex-encoded, 32 bytes) so its
    /// messages can be verified. Rejects keys that do not hash to the
    /// claimed node ID.
    pub fn register_peer(&self, peer: NodeId, pub_key_hex: &str) -> Result<(), ProtocolError> {
        let bytes = hex::decode(pub_key_hex)
            .map_err(|e| ProtocolError::Crypto(format!("invalid hex public key: {e}")))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::Crypto("public key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| ProtocolError::Crypto(format!("invalid public key: {e}")))?;
        if derive_node_id(&key) != peer {
            return Err(ProtocolError::Crypto(
                "public key does not match claimed node id".into(),
            ));
        }
        self.known_keys
            .write()
            .expect("known_keys lock poisoned")
            .insert(peer, key);
        Ok(())
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.signing_key.sign(payload).to_bytes())
    }

    fn verify(&self, source: &NodeId, payload: &[u8], signature: &str) -> bool {
        let key = if *source == self.node_id() {
            self.verifying_key()
        } else {
            match self
                .known_keys
                .read()
                .expect("known_keys lock poisoned")
                .get(source)
            {
                Some(key) => *key,
                None => return false,
            }
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify(payload, &sig).is_ok()
    }
}

/// Signer that accepts everything. Used when signature enforcement is
/// disabled and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSigner;

impl Signer for NullSigner {
    fn sign(&self, _payload: &[u8]) -> String {
        String::new()
    }

    fn verify(&self, _source: &NodeId, _payload: &[u8], _signature: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_own_messages() {
        let signer = Ed25519Signer::generate();
        let id = signer.node_id();
        let sig = signer.sign(b"hello mesh");
        assert!(signer.verify(&id, b"hello mesh", &sig));
        assert!(!signer.verify(&id, b"tampered", &sig));
    }

    #[test]
    fn test_verify_registered_peer() {
        let alice = Ed25519Signer::generate();
        let bob = Ed25519Signer::generate();

        alice
            .register_peer(bob.node_id(), &hex::encode(bob.verifying_key().as_bytes()))
            .unwrap();

        let sig = bob.sign(b"from bob");
        assert!(alice.verify(&bob.node_id(), b"from bob", &sig));
    }

    #[test]
    fn test_unknown_peer_fails_verification() {
        let alice = Ed25519Signer::generate();
        let stranger = Ed25519Signer::generate();
        let sig = stranger.sign(b"payload");
        assert!(!alice.verify(&stranger.node_id(), b"payload", &sig));
    }

    #[test]
    fn test_register_peer_rejects_mismatched_id() {
        let alice = Ed25519Signer::generate();
        let bob = Ed25519Signer::generate();
        let result = alice.register_peer(
            NodeId::new("did:mesh:someone-else"),
            &hex::encode(bob.verifying_key().as_bytes()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_identity_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("node.key");

        let s1 = Ed25519Signer::load_or_create(&key_path).unwrap();
        assert!(key_path.exists(), "key file must be created on first call");

        let s2 = Ed25519Signer::load_or_create(&key_path).unwrap();
        assert_eq!(
            s1.node_id(),
            s2.node_id(),
            "identity must be stable across restarts"
        );
    }
}
