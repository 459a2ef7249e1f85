use thiserror::Error;

/// Node-level failures. Configuration problems are fatal at startup and
/// prevent the node from joining the network; transient peer issues never
/// appear here.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] amp_transport::TransportError),

    #[error(transparent)]
    Consensus(#[from] amp_consensus::ConsensusError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node already started")]
    AlreadyStarted,
}
