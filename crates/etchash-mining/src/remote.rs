//! Remote mining coordination.
//!
//! External miners poll for work, solve it themselves and submit the nonce
//! and mix digest back. The coordinator keeps the current work plus a small
//! set of recently issued work so that a solution for work superseded a
//! moment ago is still accepted.

use crate::{MiningError, MiningResult};
use etchash_consensus::{
    seed_hash, target_for, to_be_32, BlockHeader, EpochCache, EthashVerifier, H256,
};
use lru::LruCache;
use num_bigint::BigUint;
use num_traits::One;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Recently issued work kept for late submissions.
pub const RECENT_WORK_CAPACITY: usize = 8;

/// How long a reported hashrate counts towards the total.
pub const HASHRATE_EXPIRY: Duration = Duration::from_secs(10);

/// Work advertised to external miners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningWork {
    /// Seal hash of the header to mine.
    pub pow_hash: H256,
    /// Seed hash of the header's epoch.
    pub seed_hash: H256,
    /// `2^256 / difficulty`.
    pub target: BigUint,
    /// Block number.
    pub number: u64,
}

impl MiningWork {
    /// `[pow_hash, seed_hash, target, number]` as 0x-prefixed hex.
    ///
    /// Hashes and the target are 32 bytes wide; a target of exactly 2^256
    /// (difficulty 1) is rendered as all ones. The number is minimal-width.
    pub fn to_hex(&self) -> [String; 4] {
        let max = (BigUint::one() << 256u32) - 1u32;
        let target = if self.target > max { max } else { self.target.clone() };
        [
            format!("0x{}", hex::encode(self.pow_hash)),
            format!("0x{}", hex::encode(self.seed_hash)),
            format!("0x{}", hex::encode(to_be_32(&target))),
            format!("0x{:x}", self.number),
        ]
    }
}

/// A solution submitted by an external miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowSolution {
    /// Nonce found by the miner.
    pub nonce: u64,
    /// Seal hash of the work it solves.
    pub pow_hash: H256,
    /// Mix digest claimed by the miner.
    pub mix_digest: H256,
}

impl PowSolution {
    /// Parse raw submission fields, checking their lengths.
    pub fn from_bytes(nonce: &[u8], pow_hash: &[u8], mix_digest: &[u8]) -> MiningResult<Self> {
        let nonce: [u8; 8] = nonce.try_into().map_err(|_| {
            MiningError::InvalidParams(format!("nonce must be 8 bytes, got {}", nonce.len()))
        })?;
        let pow_hash: H256 = pow_hash.try_into().map_err(|_| {
            MiningError::InvalidParams(format!("pow hash must be 32 bytes, got {}", pow_hash.len()))
        })?;
        let mix_digest: H256 = mix_digest.try_into().map_err(|_| {
            MiningError::InvalidParams(format!(
                "mix digest must be 32 bytes, got {}",
                mix_digest.len()
            ))
        })?;

        Ok(Self {
            nonce: u64::from_be_bytes(nonce),
            pow_hash,
            mix_digest,
        })
    }
}

struct RemoteState {
    current_block: Option<BlockHeader>,
    current_work: Option<MiningWork>,
    recent: LruCache<H256, BlockHeader>,
    hashrates: HashMap<H256, (u64, Instant)>,
}

/// Hands out work to external miners and collects their solutions.
pub struct RemoteSealer {
    cache: Arc<EpochCache>,
    verifier: EthashVerifier,
    state: Mutex<RemoteState>,
    sealed_tx: mpsc::UnboundedSender<BlockHeader>,
}

impl RemoteSealer {
    /// Create a coordinator that delivers sealed blocks on `sealed_tx`.
    pub fn new(cache: Arc<EpochCache>, sealed_tx: mpsc::UnboundedSender<BlockHeader>) -> Self {
        let capacity = NonZeroUsize::new(RECENT_WORK_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            verifier: EthashVerifier::new(Arc::clone(&cache)),
            cache,
            state: Mutex::new(RemoteState {
                current_block: None,
                current_work: None,
                recent: LruCache::new(capacity),
                hashrates: HashMap::new(),
            }),
            sealed_tx,
        }
    }

    /// Make `header` the current work.
    pub fn submit_block(&self, header: BlockHeader) -> MiningWork {
        let epoch = self.cache.schedule().describe(header.number);
        let work = MiningWork {
            pow_hash: header.pow_hash(),
            seed_hash: seed_hash(epoch.seed),
            target: target_for(&header.difficulty),
            number: header.number,
        };

        let mut state = self.state.lock();
        if let Some((evicted, _)) = state.recent.push(work.pow_hash, header.clone()) {
            if evicted != work.pow_hash {
                debug!(pow_hash = %hex::encode(evicted), "Evicted stale work");
            }
        }
        state.current_block = Some(header);
        state.current_work = Some(work.clone());

        debug!(
            number = work.number,
            pow_hash = %hex::encode(work.pow_hash),
            "New remote work"
        );
        work
    }

    /// The current work.
    pub fn get_work(&self) -> MiningResult<MiningWork> {
        self.state
            .lock()
            .current_work
            .clone()
            .ok_or(MiningError::WorkUnavailable)
    }

    /// The block behind the current work.
    pub fn current_block(&self) -> Option<BlockHeader> {
        self.state.lock().current_block.clone()
    }

    /// Submit raw solution fields.
    ///
    /// Malformed fields fail with `InvalidParams`. A well-formed solution
    /// returns whether it was accepted.
    pub fn submit_work(&self, nonce: &[u8], pow_hash: &[u8], mix_digest: &[u8]) -> MiningResult<bool> {
        let solution = PowSolution::from_bytes(nonce, pow_hash, mix_digest)?;
        Ok(self.submit_solution(solution))
    }

    /// Check a solution against recently issued work.
    ///
    /// An accepted solution is delivered on the sealed channel exactly once:
    /// the work it solves is consumed, so a resubmission is rejected. It
    /// clears the current work only if it solves that work.
    pub fn submit_solution(&self, solution: PowSolution) -> bool {
        let header = match self.state.lock().recent.peek(&solution.pow_hash) {
            Some(header) => header.clone(),
            None => {
                debug!(
                    pow_hash = %hex::encode(solution.pow_hash),
                    "Solution for unknown work"
                );
                return false;
            }
        };

        let sealed = header.with_seal(solution.nonce, solution.mix_digest);
        if let Err(e) = self.verifier.verify_seal(&sealed) {
            warn!(number = header.number, "Rejected remote solution: {}", e);
            return false;
        }

        {
            let mut state = self.state.lock();
            // Another submission for the same work may have won the race.
            if state.recent.pop(&solution.pow_hash).is_none() {
                debug!(
                    pow_hash = %hex::encode(solution.pow_hash),
                    "Work already sealed"
                );
                return false;
            }
            let is_current = state
                .current_work
                .as_ref()
                .is_some_and(|work| work.pow_hash == solution.pow_hash);
            if is_current {
                state.current_work = None;
                state.current_block = None;
            }
        }

        info!(
            number = sealed.number,
            nonce = sealed.nonce,
            hash = %hex::encode(sealed.hash()),
            "Remote solution accepted"
        );

        if self.sealed_tx.send(sealed).is_err() {
            warn!("Sealed block dropped, receiver closed");
        }
        true
    }

    /// Withdraw the work for `pow_hash`, e.g. once it was sealed locally.
    ///
    /// Returns whether any work was withdrawn.
    pub fn withdraw(&self, pow_hash: &H256) -> bool {
        let mut state = self.state.lock();
        let removed = state.recent.pop(pow_hash).is_some();
        let is_current = state
            .current_work
            .as_ref()
            .is_some_and(|work| work.pow_hash == *pow_hash);
        if is_current {
            state.current_work = None;
            state.current_block = None;
        }
        if removed || is_current {
            debug!(pow_hash = %hex::encode(pow_hash), "Withdrew remote work");
        }
        removed || is_current
    }

    /// Drop the current work and every recently issued work.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.current_work = None;
        state.current_block = None;
        state.recent.clear();
    }

    /// Record the hashrate reported by worker `id`.
    pub fn submit_hashrate(&self, id: H256, rate: u64) {
        self.state.lock().hashrates.insert(id, (rate, Instant::now()));
    }

    /// Sum of hashrates reported within the expiry window.
    pub fn hashrate(&self) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        state
            .hashrates
            .retain(|_, (_, reported)| now.duration_since(*reported) < HASHRATE_EXPIRY);
        state
            .hashrates
            .values()
            .fold(0u64, |total, (rate, _)| total.saturating_add(*rate))
    }

    /// Number of works kept for late submissions.
    pub fn recent_len(&self) -> usize {
        self.state.lock().recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchash_consensus::{hashimoto_light, EpochSchedule, EthashParams};

    fn setup() -> (RemoteSealer, mpsc::UnboundedReceiver<BlockHeader>) {
        let cache = Arc::new(EpochCache::with_params(
            EpochSchedule::new(u64::MAX),
            EthashParams::with_sizes(1 << 12, 1 << 8, 1 << 16, 1 << 10),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        (RemoteSealer::new(cache, tx), rx)
    }

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            timestamp: 1_600_000_000 + number,
            difficulty: BigUint::from(1u32),
            ..Default::default()
        }
    }

    fn solve(sealer: &RemoteSealer, header: &BlockHeader) -> PowSolution {
        let ws = sealer.cache.get(header.number).unwrap();
        let pow_hash = header.pow_hash();
        let output = hashimoto_light(&ws, &pow_hash, None, 99);
        PowSolution {
            nonce: 99,
            pow_hash,
            mix_digest: output.mix_digest,
        }
    }

    #[test]
    fn test_get_work_without_block() {
        let (sealer, _rx) = setup();
        assert!(matches!(sealer.get_work(), Err(MiningError::WorkUnavailable)));
    }

    #[test]
    fn test_work_hex_layout() {
        let (sealer, _rx) = setup();
        let work = sealer.submit_block(header(0x1234));
        let hex = work.to_hex();
        assert_eq!(hex[0].len(), 66);
        assert_eq!(hex[1], format!("0x{}", hex::encode(seed_hash(0))));
        // difficulty 1 saturates to the largest 256-bit value
        assert_eq!(hex[2], format!("0x{}", "f".repeat(64)));
        assert_eq!(hex[3], "0x1234");
    }

    #[test]
    fn test_submit_work_rejects_bad_lengths() {
        let (sealer, _rx) = setup();
        assert!(matches!(
            sealer.submit_work(&[0u8; 7], &[0u8; 32], &[0u8; 32]),
            Err(MiningError::InvalidParams(_))
        ));
        assert!(matches!(
            sealer.submit_work(&[0u8; 8], &[0u8; 31], &[0u8; 32]),
            Err(MiningError::InvalidParams(_))
        ));
        assert!(matches!(
            sealer.submit_work(&[0u8; 8], &[0u8; 32], &[0u8; 33]),
            Err(MiningError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_unknown_work_rejected_without_mutation() {
        let (sealer, _rx) = setup();
        let work = sealer.submit_block(header(1));
        assert!(!sealer.submit_work(&[0u8; 8], &[9u8; 32], &[0u8; 32]).unwrap());
        assert_eq!(sealer.get_work().unwrap(), work);
    }

    #[test]
    fn test_valid_solution_delivered_and_clears_current() {
        let (sealer, mut rx) = setup();
        let h = header(1);
        sealer.submit_block(h.clone());

        let solution = solve(&sealer, &h);
        assert!(sealer.submit_work(
            &solution.nonce.to_be_bytes(),
            &solution.pow_hash,
            &solution.mix_digest
        )
        .unwrap());

        let sealed = rx.try_recv().unwrap();
        assert_eq!(sealed.nonce, 99);
        assert_eq!(sealed.mix_digest, solution.mix_digest);
        assert!(matches!(sealer.get_work(), Err(MiningError::WorkUnavailable)));
    }

    #[test]
    fn test_wrong_mix_rejected() {
        let (sealer, mut rx) = setup();
        let h = header(1);
        sealer.submit_block(h.clone());

        let mut solution = solve(&sealer, &h);
        solution.mix_digest[0] ^= 0xff;
        assert!(!sealer.submit_solution(solution));
        assert!(rx.try_recv().is_err());
        assert!(sealer.get_work().is_ok());
    }

    #[test]
    fn test_superseded_work_still_accepted() {
        let (sealer, mut rx) = setup();
        let old = header(1);
        sealer.submit_block(old.clone());
        let newer = sealer.submit_block(header(2));

        assert!(sealer.submit_solution(solve(&sealer, &old)));
        assert_eq!(rx.try_recv().unwrap().number, 1);
        // Current work untouched
        assert_eq!(sealer.get_work().unwrap(), newer);
    }

    #[test]
    fn test_recent_work_bounded() {
        let (sealer, _rx) = setup();
        let first = header(1);
        sealer.submit_block(first.clone());
        for n in 2..=(RECENT_WORK_CAPACITY as u64 + 1) {
            sealer.submit_block(header(n));
        }
        assert_eq!(sealer.recent_len(), RECENT_WORK_CAPACITY);
        assert!(!sealer.submit_solution(solve(&sealer, &first)));
    }

    #[test]
    fn test_replayed_solution_rejected() {
        let (sealer, mut rx) = setup();
        let h = header(1);
        sealer.submit_block(h.clone());

        let solution = solve(&sealer, &h);
        assert!(sealer.submit_solution(solution));
        assert!(!sealer.submit_solution(solution));

        assert_eq!(rx.try_recv().unwrap().nonce, 99);
        assert!(rx.try_recv().is_err());
        assert_eq!(sealer.recent_len(), 0);
    }

    #[test]
    fn test_replayed_superseded_solution_rejected() {
        let (sealer, mut rx) = setup();
        let old = header(1);
        sealer.submit_block(old.clone());
        let newer = sealer.submit_block(header(2));

        let solution = solve(&sealer, &old);
        assert!(sealer.submit_solution(solution));
        assert!(!sealer.submit_solution(solution));
        assert_eq!(rx.try_recv().unwrap().number, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(sealer.get_work().unwrap(), newer);
    }

    #[test]
    fn test_withdrawn_work_rejects_solutions() {
        let (sealer, mut rx) = setup();
        let h = header(1);
        sealer.submit_block(h.clone());

        assert!(sealer.withdraw(&h.pow_hash()));
        assert!(!sealer.withdraw(&h.pow_hash()));
        assert!(matches!(sealer.get_work(), Err(MiningError::WorkUnavailable)));
        assert!(!sealer.submit_solution(solve(&sealer, &h)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clear_drops_all_work() {
        let (sealer, _rx) = setup();
        let first = header(1);
        sealer.submit_block(first.clone());
        sealer.submit_block(header(2));

        sealer.clear();
        assert_eq!(sealer.recent_len(), 0);
        assert!(sealer.get_work().is_err());
        assert!(!sealer.submit_solution(solve(&sealer, &first)));
    }

    #[test]
    fn test_hashrate_aggregation() {
        let (sealer, _rx) = setup();
        sealer.submit_hashrate([1u8; 32], 100);
        sealer.submit_hashrate([2u8; 32], 250);
        sealer.submit_hashrate([1u8; 32], 150);
        assert_eq!(sealer.hashrate(), 400);
    }
}
