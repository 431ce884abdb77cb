//! Ethash nonce search for CPU mining.
//!
//! For each nonce the solver runs hashimoto against the epoch's light cache
//! and keeps the first nonce whose final digest is at or below
//! `2^256 / difficulty`. Dataset items are derived from the cache on demand,
//! so CPU mining is only practical on low-difficulty chains.

use crate::{MiningError, MiningResult};
use etchash_consensus::{
    hashimoto, meets_target, target_for, BlockHeader, EpochCache, WorkingSet, H256,
};
use num_bigint::BigUint;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Nonces tried between cancellation checks.
pub const DEFAULT_BATCH_SIZE: u64 = 256;

/// A nonce together with the digests it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seal {
    /// Winning nonce.
    pub nonce: u64,
    /// Mix digest to place in the header.
    pub mix_digest: H256,
    /// Final digest that met the target.
    pub result: H256,
}

/// Try `batch_size` consecutive nonces from `start_nonce`, wrapping on
/// overflow.
///
/// Adds the number of hashes computed to `hash_counter`.
pub fn try_solve_batch(
    working_set: &WorkingSet,
    pow_hash: &H256,
    target: &BigUint,
    start_nonce: u64,
    batch_size: u64,
    hash_counter: &AtomicU64,
) -> Option<Seal> {
    for offset in 0..batch_size {
        let nonce = start_nonce.wrapping_add(offset);
        let output = hashimoto(working_set.size(), working_set, pow_hash, None, nonce);

        if meets_target(&output.result, target) {
            hash_counter.fetch_add(offset + 1, Ordering::Relaxed);
            return Some(Seal {
                nonce,
                mix_digest: output.mix_digest,
                result: output.result,
            });
        }
    }

    hash_counter.fetch_add(batch_size, Ordering::Relaxed);
    None
}

/// Single-threaded Ethash solver.
#[derive(Clone)]
pub struct EthashSolver {
    cache: Arc<EpochCache>,
    batch_size: u64,
}

impl EthashSolver {
    /// Create a solver drawing working sets from `cache`.
    pub fn new(cache: Arc<EpochCache>) -> Self {
        Self {
            cache,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the number of nonces tried between cancellation checks.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Search for a seal for `header`.
    ///
    /// Starts at `start_nonce`, or a random nonce when `None`, and walks the
    /// nonce space sequentially. Returns the sealed header, or `None` once
    /// `cancel` is set. The flag is checked between batches.
    pub fn mine(
        &self,
        header: &BlockHeader,
        start_nonce: Option<u64>,
        cancel: &AtomicBool,
    ) -> MiningResult<Option<BlockHeader>> {
        let counter = AtomicU64::new(0);
        let seal = self.search(header, start_nonce, cancel, &counter)?;
        Ok(seal.map(|seal| header.with_seal(seal.nonce, seal.mix_digest)))
    }

    /// Like [`mine`](Self::mine) but returns the raw seal and counts hashes.
    pub fn search(
        &self,
        header: &BlockHeader,
        start_nonce: Option<u64>,
        cancel: &AtomicBool,
        hash_counter: &AtomicU64,
    ) -> MiningResult<Option<Seal>> {
        let working_set = self.cache.get(header.number).map_err(|e| {
            MiningError::SealingFailed(format!("working set for block {}: {}", header.number, e))
        })?;
        let target = target_for(&header.difficulty);
        let pow_hash = header.pow_hash();

        let mut nonce = start_nonce.unwrap_or_else(|| rand::thread_rng().gen());
        debug!(
            number = header.number,
            difficulty = %header.difficulty,
            start_nonce = nonce,
            "Starting nonce search"
        );

        loop {
            if cancel.load(Ordering::Relaxed) {
                trace!(
                    number = header.number,
                    hashes = hash_counter.load(Ordering::Relaxed),
                    "Nonce search cancelled"
                );
                return Ok(None);
            }

            if let Some(seal) = try_solve_batch(
                &working_set,
                &pow_hash,
                &target,
                nonce,
                self.batch_size,
                hash_counter,
            ) {
                debug!(
                    number = header.number,
                    nonce = seal.nonce,
                    hashes = hash_counter.load(Ordering::Relaxed),
                    "Found seal"
                );
                return Ok(Some(seal));
            }

            nonce = nonce.wrapping_add(self.batch_size);
        }
    }
}
