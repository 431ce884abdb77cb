//! Mining error types.

use thiserror::Error;

/// Mining errors.
#[derive(Error, Debug)]
pub enum MiningError {
    /// No work has been issued, or the last one was already solved.
    #[error("No mining work available")]
    WorkUnavailable,

    /// Malformed request parameters.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Invalid solution.
    #[error("Invalid solution: {0}")]
    InvalidSolution(String),

    /// The nonce search failed internally.
    #[error("Sealing failed: {0}")]
    SealingFailed(String),

    /// Consensus error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] etchash_consensus::ConsensusError),
}

/// Result type for mining operations.
pub type MiningResult<T> = Result<T, MiningError>;
