//! # etchash-consensus
//!
//! Consensus rules for Ethash-family chains running the Etchash variant.
//!
//! This crate provides:
//! - The epoch schedule with ECIP-1099 epoch doubling
//! - Ethash light-cache generation, hashimoto and seal verification
//! - A single-flight cache of per-epoch working sets
//! - Difficulty adjustment with the DieHard / Gotham / ECIP-1041 bomb schedule
//! - ECIP-1017 era rewards for blocks and uncles
//! - Antigravity scoring for the artificial-finality reorg guard
//!
//! ## Ethash
//!
//! Ethash is a memory-hard Proof-of-Work algorithm. Verification only needs
//! the per-epoch light cache (16 MiB at epoch 0); dataset items are derived
//! from it on demand.
//!
//! ## Etchash
//!
//! From the ECIP-1099 transition block, epochs last 60000 blocks instead of
//! 30000, halving the rate at which the dataset grows.

pub mod antigravity;
pub mod cache;
mod chain_params;
pub mod difficulty;
pub mod epoch;
mod error;
pub mod ethash;
mod header;
pub mod reward;
mod validation;

pub use antigravity::{antigravity, should_reject_reorg, ReorgContext};
pub use cache::EpochCache;
pub use chain_params::{ChainParams, ChainParamsConfig, ChainParamsError};
pub use difficulty::{calculate_difficulty, time_bomb, DifficultyCalculator, DifficultyRuleset};
pub use epoch::{seed_epoch_of, Epoch, EpochSchedule};
pub use error::{ConsensusError, ConsensusResult};
pub use ethash::{
    cache_size, dataset_size, hashimoto, hashimoto_light, meets_target, seed_hash, target_for,
    EthashParams, HashimotoOutput, WorkingSet,
};
pub use header::{to_be_32, Address, BlockHeader, H256, ZERO_HASH};
pub use reward::{block_reward, block_rewards, era, uncle_reward, RewardEngine, RewardEntry, RewardKind};
pub use validation::{EthashHeaderValidator, EthashVerifier, HeaderValidator};

/// Ethash and Etchash network parameters.
pub mod params {
    /// Blocks per epoch before the ECIP-1099 transition.
    pub const EPOCH_LENGTH: u64 = 30_000;

    /// Blocks per epoch from the ECIP-1099 transition on.
    pub const ECIP1099_EPOCH_LENGTH: u64 = 60_000;

    /// Bytes in a word.
    pub const WORD_BYTES: usize = 4;

    /// Bytes in a cache or dataset item.
    pub const HASH_BYTES: usize = 64;

    /// Width of the hashimoto mix in bytes.
    pub const MIX_BYTES: usize = 128;

    /// Cache size at epoch 0 (16 MiB).
    pub const CACHE_BYTES_INIT: u64 = 1 << 24;

    /// Cache growth per epoch (128 KiB).
    pub const CACHE_BYTES_GROWTH: u64 = 1 << 17;

    /// Dataset size at epoch 0 (1 GiB).
    pub const DATASET_BYTES_INIT: u64 = 1 << 30;

    /// Dataset growth per epoch (8 MiB).
    pub const DATASET_BYTES_GROWTH: u64 = 1 << 23;

    /// Cache items mixed into each dataset item.
    pub const DATASET_PARENTS: u32 = 256;

    /// RandMemoHash rounds in cache generation.
    pub const CACHE_ROUNDS: usize = 3;

    /// Dataset rows read per hashimoto run.
    pub const ACCESSES: u32 = 64;

    /// Maximum header extra data in bytes.
    pub const MAX_EXTRA_DATA_SIZE: usize = 32;

    /// Classic mainnet era length.
    pub const CLASSIC_ERA_LENGTH: u64 = 5_000_000;

    /// Mordor testnet era length.
    pub const MORDOR_ERA_LENGTH: u64 = 2_000_000;

    /// Classic mainnet ECIP-1099 activation.
    pub const CLASSIC_ECIP1099_BLOCK: u64 = 11_700_000;

    /// Mordor testnet ECIP-1099 activation.
    pub const MORDOR_ECIP1099_BLOCK: u64 = 2_520_000;
}
