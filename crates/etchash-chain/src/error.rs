//! Chain-tip selection errors.

use thiserror::Error;

/// Errors raised while evaluating a chain-tip change.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The storage layer found no common ancestor.
    #[error("No common ancestor between {current} and {candidate}")]
    AncestorNotFound { current: String, candidate: String },

    /// A header needed for the decision has no total difficulty.
    #[error("Total difficulty unknown for block {0}")]
    MissingTotalDifficulty(u64),

    /// Storage lookup failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Consensus error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] etchash_consensus::ConsensusError),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
