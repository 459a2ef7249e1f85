use thiserror::Error;

/// Consensus-layer failures.
///
/// Quorum failures and leader timeouts are not errors: they resolve
/// internally through abort and re-election, surfacing only as outcomes.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid transaction signature from {0}")]
    InvalidSignature(String),

    #[error("epoch mismatch: expected {expected}, got {got}")]
    EpochMismatch { expected: u64, got: u64 },

    #[error("node {0} is not in the validator set")]
    NotValidator(String),

    #[error("unknown consensus algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("invalid consensus configuration: {0}")]
    InvalidConfig(String),
}
