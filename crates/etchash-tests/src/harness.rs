//! Test harness for integration tests.
//!
//! Provides working-set caches small enough to build in milliseconds, an
//! in-memory header store that answers common-ancestor queries, and a
//! controllable sync status for the finality monitor.

use etchash_chain::{AncestorLookup, ChainError, ChainResult, SyncStatus};
use etchash_consensus::{
    BlockHeader, ChainParams, EpochCache, EpochSchedule, EthashParams, EthashVerifier, H256,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Ethash parameters with a 4 KiB cache and a 64 KiB dataset.
pub fn tiny_params() -> EthashParams {
    EthashParams::with_sizes(1 << 12, 1 << 8, 1 << 16, 1 << 10)
}

/// Working-set cache over [`tiny_params`] without the epoch doubling.
pub fn tiny_cache() -> Arc<EpochCache> {
    tiny_cache_with_transition(u64::MAX)
}

/// Working-set cache over [`tiny_params`] doubling epochs at `transition`.
pub fn tiny_cache_with_transition(transition: u64) -> Arc<EpochCache> {
    Arc::new(EpochCache::with_params(
        EpochSchedule::new(transition),
        tiny_params(),
    ))
}

/// Verifier sharing `cache`.
pub fn verifier(cache: &Arc<EpochCache>) -> EthashVerifier {
    EthashVerifier::new(Arc::clone(cache))
}

/// Development chain: every non-genesis block has difficulty 1.
pub fn dev_chain_params() -> ChainParams {
    let mut config = ChainParams::classic().to_config();
    config.era_length = Some(100);
    config.ecip1099_block = Some(u64::MAX);
    config.genesis_difficulty_hex = Some("0x1".to_string());
    config.fixed_difficulty_hex = Some("0x1".to_string());
    ChainParams::from_config(&config).expect("dev chain params are valid")
}

/// Header store keyed by hash.
#[derive(Default)]
pub struct MemoryChain {
    headers: RwLock<HashMap<H256, BlockHeader>>,
}

impl MemoryChain {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a header.
    pub fn insert(&self, header: BlockHeader) {
        self.headers.write().insert(header.hash(), header);
    }

    /// Store every header of `chain`.
    pub fn extend(&self, chain: &[BlockHeader]) {
        for header in chain {
            self.insert(header.clone());
        }
    }

    /// Look up a header.
    pub fn get(&self, hash: &H256) -> Option<BlockHeader> {
        self.headers.read().get(hash).cloned()
    }

    /// Number of stored headers.
    pub fn len(&self) -> usize {
        self.headers.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes from `header` back to the oldest stored ancestor.
    fn lineage(&self, header: &BlockHeader) -> Vec<H256> {
        let headers = self.headers.read();
        let mut out = vec![header.hash()];
        let mut parent = header.parent_hash;
        while let Some(next) = headers.get(&parent) {
            out.push(parent);
            if next.is_genesis() {
                break;
            }
            parent = next.parent_hash;
        }
        out
    }
}

impl AncestorLookup for MemoryChain {
    fn common_ancestor(
        &self,
        current: &BlockHeader,
        candidate: &BlockHeader,
    ) -> ChainResult<BlockHeader> {
        let current_lineage = self.lineage(current);
        self.lineage(candidate)
            .into_iter()
            .find(|hash| current_lineage.contains(hash))
            .and_then(|hash| self.get(&hash))
            .ok_or_else(|| ChainError::AncestorNotFound {
                current: hex::encode(current.hash()),
                candidate: hex::encode(candidate.hash()),
            })
    }
}

impl AncestorLookup for &MemoryChain {
    fn common_ancestor(
        &self,
        current: &BlockHeader,
        candidate: &BlockHeader,
    ) -> ChainResult<BlockHeader> {
        (**self).common_ancestor(current, candidate)
    }
}

/// Sync status whose peer count and head time tests set directly.
#[derive(Debug, Default)]
pub struct TestSyncStatus {
    peers: AtomicUsize,
    head_timestamp: AtomicU64,
}

impl TestSyncStatus {
    /// Create a status with `peers` peers and a head at `head_timestamp`.
    pub fn new(peers: usize, head_timestamp: u64) -> Self {
        Self {
            peers: AtomicUsize::new(peers),
            head_timestamp: AtomicU64::new(head_timestamp),
        }
    }

    /// Set the peer count.
    pub fn set_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::SeqCst);
    }

    /// Set the head timestamp.
    pub fn set_head_timestamp(&self, timestamp: u64) {
        self.head_timestamp.store(timestamp, Ordering::SeqCst);
    }
}

impl SyncStatus for TestSyncStatus {
    fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    fn head_timestamp(&self) -> u64 {
        self.head_timestamp.load(Ordering::SeqCst)
    }
}
