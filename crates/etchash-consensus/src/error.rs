//! Error types for consensus validation.

use crate::chain_params::ChainParamsError;
use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Invalid Proof-of-Work solution.
    #[error("Invalid PoW solution: {0}")]
    InvalidPow(String),

    /// The mix digest recomputed from the nonce differs from the declared one.
    #[error("Invalid mix digest for block {number}: got {got}, expected {expected}")]
    InvalidMixDigest {
        number: u64,
        got: String,
        expected: String,
    },

    /// The final digest does not meet the difficulty target.
    #[error("Insufficient work for block {number}: digest {digest} above target")]
    InsufficientWork { number: u64, digest: String },

    /// Invalid block header.
    #[error("Invalid block header: {0}")]
    InvalidHeader(String),

    /// Invalid timestamp.
    #[error("Invalid timestamp: block {block_time}, expected after {parent_time}")]
    InvalidTimestamp { block_time: u64, parent_time: u64 },

    /// Invalid difficulty.
    #[error("Invalid difficulty: got {got}, expected {expected}")]
    InvalidDifficulty { got: String, expected: String },

    /// Working set could not be produced for an epoch.
    #[error("Working set unavailable for seed epoch {seed_epoch}: {reason}")]
    WorkingSetUnavailable { seed_epoch: u64, reason: String },

    /// Broken chain configuration.
    #[error(transparent)]
    Config(#[from] ChainParamsError),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
