use thiserror::Error;

/// Protocol-level failures.
///
/// These never cross the application boundary for remote misbehavior:
/// ingestion converts them into logged drops.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}
