//! # etchash-mining
//!
//! Mining support for Etchash chains.
//!
//! This crate provides:
//! - A cancellable Ethash nonce search
//! - A multi-threaded worker pool for local CPU mining
//! - Remote mining coordination (work query, solution submission, hashrate)
//! - A `Miner` facade delivering sealed blocks from either source

mod error;
mod miner;
pub mod remote;
pub mod solver;
pub mod worker;

pub use error::{MiningError, MiningResult};
pub use miner::{Miner, MinerConfig, MiningStats};
pub use remote::{MiningWork, PowSolution, RemoteSealer, HASHRATE_EXPIRY, RECENT_WORK_CAPACITY};
pub use solver::{try_solve_batch, EthashSolver, Seal};
pub use worker::{FoundSolution, MiningTask, MiningWorker, WorkerPool};
