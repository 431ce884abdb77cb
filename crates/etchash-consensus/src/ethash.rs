//! Ethash Proof-of-Work.
//!
//! Ethash is a memory-hard PoW built around a per-epoch pseudo-random
//! dataset. The algorithm:
//!
//! 1. Derives a seed hash for the epoch by iterating Keccak-256
//! 2. Fills a light cache (16 MiB at epoch 0) from the seed with Keccak-512
//!    and three RandMemoHash rounds
//! 3. Defines a dataset (1 GiB at epoch 0) whose 64-byte items are each
//!    derived from 256 pseudo-randomly chosen cache items
//! 4. Mixes the header hash and nonce with 64 dataset reads ("hashimoto"),
//!    producing a mix digest and a final digest compared against the target
//!
//! For verification and CPU mining we compute dataset items on demand from the
//! cache rather than materializing the full dataset.
//!
//! Key parameters:
//! - cache: 2^24 bytes + 2^17 per epoch, 64-byte items, prime item count
//! - dataset: 2^30 bytes + 2^23 per epoch, 128-byte rows, prime row count
//! - 256 dataset parents, 3 cache rounds, 64 accesses

use crate::epoch::Epoch;
use crate::header::H256;
use crate::params::{
    ACCESSES, CACHE_BYTES_GROWTH, CACHE_BYTES_INIT, CACHE_ROUNDS, DATASET_BYTES_GROWTH,
    DATASET_BYTES_INIT, DATASET_PARENTS, HASH_BYTES, MIX_BYTES, WORD_BYTES,
};
use crate::{ConsensusError, ConsensusResult};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use sha3::{Digest, Keccak256, Keccak512};
use std::time::Instant;
use tracing::{debug, trace};

/// 32-bit words per 64-byte hash.
const HASH_WORDS: usize = HASH_BYTES / WORD_BYTES;

/// 32-bit words per 128-byte mix.
const MIX_WORDS: usize = MIX_BYTES / WORD_BYTES;

/// Dataset items read per access.
const MIX_HASHES: usize = MIX_BYTES / HASH_BYTES;

/// FNV prime used by Ethash's non-associative mixing.
const FNV_PRIME: u32 = 0x0100_0193;

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

fn keccak256(data: &[u8]) -> H256 {
    Keccak256::digest(data).into()
}

fn keccak512(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    out.copy_from_slice(&Keccak512::digest(data));
    out
}

fn words_to_bytes(words: &[u32; HASH_WORDS]) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    for (chunk, word) in out.chunks_exact_mut(WORD_BYTES).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn bytes_to_words(bytes: &[u8; HASH_BYTES]) -> [u32; HASH_WORDS] {
    let mut out = [0u32; HASH_WORDS];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

/// Size schedule for caches and datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthashParams {
    /// Cache size at epoch 0 in bytes.
    pub cache_bytes_init: u64,
    /// Cache growth per epoch in bytes.
    pub cache_bytes_growth: u64,
    /// Dataset size at epoch 0 in bytes.
    pub dataset_bytes_init: u64,
    /// Dataset growth per epoch in bytes.
    pub dataset_bytes_growth: u64,
}

impl Default for EthashParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl EthashParams {
    /// Consensus sizes.
    pub fn mainnet() -> Self {
        Self {
            cache_bytes_init: CACHE_BYTES_INIT,
            cache_bytes_growth: CACHE_BYTES_GROWTH,
            dataset_bytes_init: DATASET_BYTES_INIT,
            dataset_bytes_growth: DATASET_BYTES_GROWTH,
        }
    }

    /// Custom sizes (for testing). Results are not consensus-compatible.
    pub fn with_sizes(
        cache_bytes_init: u64,
        cache_bytes_growth: u64,
        dataset_bytes_init: u64,
        dataset_bytes_growth: u64,
    ) -> Self {
        Self {
            cache_bytes_init,
            cache_bytes_growth,
            dataset_bytes_init,
            dataset_bytes_growth,
        }
    }

    /// Cache size in bytes for a dag epoch.
    pub fn cache_size(&self, epoch: u64) -> u64 {
        let upper = (self.cache_bytes_init + self.cache_bytes_growth * epoch) / HASH_BYTES as u64;
        find_largest_prime(upper) * HASH_BYTES as u64
    }

    /// Dataset size in bytes for a dag epoch.
    pub fn dataset_size(&self, epoch: u64) -> u64 {
        let upper =
            (self.dataset_bytes_init + self.dataset_bytes_growth * epoch) / MIX_BYTES as u64;
        find_largest_prime(upper) * MIX_BYTES as u64
    }
}

/// Consensus cache size in bytes for a dag epoch.
pub fn cache_size(epoch: u64) -> u64 {
    EthashParams::mainnet().cache_size(epoch)
}

/// Consensus dataset size in bytes for a dag epoch.
pub fn dataset_size(epoch: u64) -> u64 {
    EthashParams::mainnet().dataset_size(epoch)
}

/// Trial-division primality test.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut divisor = 3u64;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Largest prime not greater than `upper`. Returns 0 when there is none.
pub fn find_largest_prime(upper: u64) -> u64 {
    if upper < 2 {
        return 0;
    }
    if upper == 2 {
        return 2;
    }
    let mut candidate = if upper % 2 == 0 { upper - 1 } else { upper };
    while !is_prime(candidate) {
        if candidate == 3 {
            return 2;
        }
        candidate -= 2;
    }
    candidate
}

/// Seed hash for a seed epoch: Keccak-256 applied `seed_epoch` times to zero.
pub fn seed_hash(seed_epoch: u64) -> H256 {
    let mut seed = [0u8; 32];
    for _ in 0..seed_epoch {
        seed = keccak256(&seed);
    }
    seed
}

/// Immutable per-epoch working set: the light cache plus dataset geometry.
pub struct WorkingSet {
    epoch: Epoch,
    seed: H256,
    /// Light cache as little-endian 32-bit words, 16 per item.
    cache: Vec<u32>,
    /// Dataset size in bytes.
    full_size: u64,
}

impl std::fmt::Debug for WorkingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingSet")
            .field("epoch", &self.epoch)
            .field("seed", &hex::encode(self.seed))
            .field("cache_bytes", &self.cache_size())
            .field("full_size", &self.full_size)
            .finish()
    }
}

impl WorkingSet {
    /// Build the working set for an epoch with the given size schedule.
    pub fn generate(epoch: Epoch, params: &EthashParams) -> ConsensusResult<Self> {
        let cache_size = params.cache_size(epoch.dag);
        let full_size = params.dataset_size(epoch.dag);
        Self::from_seed(epoch, seed_hash(epoch.seed), cache_size, full_size)
    }

    /// Build a working set from an explicit seed and sizes.
    pub fn from_seed(
        epoch: Epoch,
        seed: H256,
        cache_size: u64,
        full_size: u64,
    ) -> ConsensusResult<Self> {
        if cache_size < HASH_BYTES as u64 || cache_size % HASH_BYTES as u64 != 0 {
            return Err(ConsensusError::WorkingSetUnavailable {
                seed_epoch: epoch.seed,
                reason: format!("invalid cache size {cache_size}"),
            });
        }
        if full_size < MIX_BYTES as u64 || full_size % MIX_BYTES as u64 != 0 {
            return Err(ConsensusError::WorkingSetUnavailable {
                seed_epoch: epoch.seed,
                reason: format!("invalid dataset size {full_size}"),
            });
        }

        let started = Instant::now();
        let cache = generate_cache(&seed, (cache_size / HASH_BYTES as u64) as usize);
        debug!(
            dag_epoch = epoch.dag,
            seed_epoch = epoch.seed,
            cache_bytes = cache_size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated ethash cache"
        );

        Ok(Self {
            epoch,
            seed,
            cache,
            full_size,
        })
    }

    /// Epoch this working set belongs to.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Seed hash the cache was derived from.
    pub fn seed(&self) -> &H256 {
        &self.seed
    }

    /// Dataset size in bytes.
    pub fn size(&self) -> u64 {
        self.full_size
    }

    /// Cache size in bytes.
    pub fn cache_size(&self) -> u64 {
        (self.cache.len() * WORD_BYTES) as u64
    }

    /// Number of 64-byte cache items.
    fn cache_items(&self) -> usize {
        self.cache.len() / HASH_WORDS
    }

    /// Read one 32-bit word of the light cache.
    pub fn word(&self, index: usize) -> u32 {
        self.cache[index]
    }

    fn cache_item(&self, index: usize) -> &[u32] {
        &self.cache[index * HASH_WORDS..(index + 1) * HASH_WORDS]
    }

    /// Compute dataset item `index` from the cache.
    pub fn calc_dataset_item(&self, index: u32) -> [u32; HASH_WORDS] {
        let n = self.cache_items();

        let mut mix = [0u32; HASH_WORDS];
        mix.copy_from_slice(self.cache_item(index as usize % n));
        mix[0] ^= index;
        mix = bytes_to_words(&keccak512(&words_to_bytes(&mix)));

        for parent in 0..DATASET_PARENTS {
            let cache_index = fnv(index ^ parent, mix[parent as usize % HASH_WORDS]) as usize % n;
            for (word, &other) in mix.iter_mut().zip(self.cache_item(cache_index)) {
                *word = fnv(*word, other);
            }
        }

        bytes_to_words(&keccak512(&words_to_bytes(&mix)))
    }
}

/// Sequential Keccak-512 fill followed by CACHE_ROUNDS of RandMemoHash.
fn generate_cache(seed: &H256, items: usize) -> Vec<u32> {
    let mut cache = vec![0u32; items * HASH_WORDS];

    let mut item = keccak512(seed);
    cache[..HASH_WORDS].copy_from_slice(&bytes_to_words(&item));
    for i in 1..items {
        item = keccak512(&item);
        cache[i * HASH_WORDS..(i + 1) * HASH_WORDS].copy_from_slice(&bytes_to_words(&item));
    }

    for _ in 0..CACHE_ROUNDS {
        for i in 0..items {
            let v = cache[i * HASH_WORDS] as usize % items;
            let prev = (i + items - 1) % items;

            let mut xored = [0u32; HASH_WORDS];
            for (k, word) in xored.iter_mut().enumerate() {
                *word = cache[prev * HASH_WORDS + k] ^ cache[v * HASH_WORDS + k];
            }
            let hashed = bytes_to_words(&keccak512(&words_to_bytes(&xored)));
            cache[i * HASH_WORDS..(i + 1) * HASH_WORDS].copy_from_slice(&hashed);
        }
    }

    cache
}

/// Output of a hashimoto run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashimotoOutput {
    /// Compressed mix digest.
    pub mix_digest: H256,
    /// Final digest compared against the difficulty target.
    pub result: H256,
    /// False only when an expected mix was given and differs.
    pub valid: bool,
}

/// Mix `header_hash` and `nonce` with dataset reads.
///
/// With `expected_mix` the output is valid only if the recomputed mix digest
/// matches it byte for byte; without, the output is always valid.
pub fn hashimoto(
    full_size: u64,
    working_set: &WorkingSet,
    header_hash: &H256,
    expected_mix: Option<&H256>,
    nonce: u64,
) -> HashimotoOutput {
    let rows = (full_size / MIX_BYTES as u64) as u32;

    let mut seed_input = [0u8; 40];
    seed_input[..32].copy_from_slice(header_hash);
    seed_input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed = keccak512(&seed_input);
    let seed_words = bytes_to_words(&seed);
    let seed_head = seed_words[0];

    let mut mix = [0u32; MIX_WORDS];
    for (i, word) in mix.iter_mut().enumerate() {
        *word = seed_words[i % HASH_WORDS];
    }

    for i in 0..ACCESSES {
        let row = fnv(i ^ seed_head, mix[i as usize % MIX_WORDS]) % rows;
        for j in 0..MIX_HASHES {
            let item = working_set.calc_dataset_item(row * MIX_HASHES as u32 + j as u32);
            for (k, &word) in item.iter().enumerate() {
                let slot = &mut mix[j * HASH_WORDS + k];
                *slot = fnv(*slot, word);
            }
        }
    }

    let mut mix_digest = [0u8; 32];
    for (i, chunk) in mix.chunks_exact(4).enumerate() {
        let compressed = fnv(fnv(fnv(chunk[0], chunk[1]), chunk[2]), chunk[3]);
        mix_digest[i * WORD_BYTES..(i + 1) * WORD_BYTES].copy_from_slice(&compressed.to_le_bytes());
    }

    let mut final_input = [0u8; HASH_BYTES + 32];
    final_input[..HASH_BYTES].copy_from_slice(&seed);
    final_input[HASH_BYTES..].copy_from_slice(&mix_digest);
    let result = keccak256(&final_input);

    let valid = expected_mix.map_or(true, |expected| *expected == mix_digest);
    trace!(
        nonce,
        mix = %hex::encode(mix_digest),
        result = %hex::encode(result),
        valid,
        "hashimoto"
    );

    HashimotoOutput {
        mix_digest,
        result,
        valid,
    }
}

/// Hashimoto over the working set's own dataset size.
pub fn hashimoto_light(
    working_set: &WorkingSet,
    header_hash: &H256,
    expected_mix: Option<&H256>,
    nonce: u64,
) -> HashimotoOutput {
    hashimoto(working_set.size(), working_set, header_hash, expected_mix, nonce)
}

/// 2^256, one above the largest 256-bit value.
fn two_pow_256() -> BigUint {
    BigUint::one() << 256
}

/// Difficulty target: 2^256 / difficulty. A zero difficulty yields 2^256.
pub fn target_for(difficulty: &BigUint) -> BigUint {
    if difficulty.is_zero() {
        return two_pow_256();
    }
    two_pow_256() / difficulty
}

/// Whether a final digest, read as a big-endian integer, meets the target.
pub fn meets_target(result: &H256, target: &BigUint) -> bool {
    BigUint::from_bytes_be(result) <= *target
}
