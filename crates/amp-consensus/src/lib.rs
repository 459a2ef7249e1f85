//! Consensus layer: total ordering and fault-tolerant commitment of
//! coordination transactions across the validator set.
//!
//! State machine per epoch:
//! `idle → proposing → voting → committing → committed` or `→ aborted`
//! on timeout or insufficient votes.
//!
//! - The current leader is the only peer allowed to propose for the
//!   active epoch; a silent leader triggers re-election next epoch
//! - A proposal commits once affirmative votes reach the quorum derived
//!   from the Byzantine-fault-tolerance ratio, and aborts as soon as a
//!   blocking minority makes quorum impossible
//! - Commit is terminal per transaction id: the ordered log is append-only
//! - The algorithm is pluggable by name behind a single
//!   leader/evaluate/quorum contract

pub mod algorithm;
pub mod engine;
pub mod epoch;
pub mod error;

pub use algorithm::{algorithm_by_name, ConsensusAlgorithm, PbftAlgorithm, RotationAlgorithm};
pub use engine::{
    CommittedEntry, ConsensusAction, ConsensusConfig, ConsensusEngine, ConsensusOutcome,
};
pub use epoch::{EpochPhase, EpochState};
pub use error::ConsensusError;
