//! Test data generators for integration tests.
//!
//! Headers built here carry a total difficulty so they can be fed straight
//! into tip acceptance. The `tag` byte goes into the extra data to keep
//! sibling branches from hashing identically.

use etchash_consensus::{Address, BlockHeader};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicU64, Ordering};

static BENEFICIARY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A fresh beneficiary address.
pub fn test_address() -> Address {
    let counter = BENEFICIARY_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut address = [0u8; 20];
    address[0] = 0xEC;
    address[12..].copy_from_slice(&counter.to_be_bytes());
    address
}

/// Genesis header at `timestamp` with the given difficulty.
pub fn genesis(timestamp: u64, difficulty: u64) -> BlockHeader {
    BlockHeader {
        timestamp,
        difficulty: BigUint::from(difficulty),
        total_difficulty: Some(BigUint::from(difficulty)),
        extra_data: b"genesis".to_vec(),
        ..Default::default()
    }
}

/// Child of `parent`, `dt` seconds later.
pub fn child(parent: &BlockHeader, difficulty: u64, dt: u64, tag: u8) -> BlockHeader {
    let total = parent.total_difficulty.clone().unwrap_or_default() + difficulty;
    BlockHeader {
        number: parent.number + 1,
        timestamp: parent.timestamp + dt,
        parent_hash: parent.hash(),
        difficulty: BigUint::from(difficulty),
        total_difficulty: Some(total),
        extra_data: vec![tag],
        ..Default::default()
    }
}

/// `len` consecutive children starting from `parent`.
pub fn extend_chain(
    parent: &BlockHeader,
    len: usize,
    difficulty: u64,
    dt: u64,
    tag: u8,
) -> Vec<BlockHeader> {
    let mut out = Vec::with_capacity(len);
    let mut tip = parent.clone();
    for _ in 0..len {
        tip = child(&tip, difficulty, dt, tag);
        out.push(tip.clone());
    }
    out
}

/// Header at `number` including uncles at the given numbers.
pub fn header_with_uncles(number: u64, uncle_numbers: &[u64]) -> BlockHeader {
    BlockHeader {
        number,
        beneficiary: test_address(),
        uncles: uncle_numbers
            .iter()
            .map(|&n| BlockHeader {
                number: n,
                beneficiary: test_address(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Unsealed header ready for mining.
pub fn mining_header(number: u64, difficulty: u64) -> BlockHeader {
    BlockHeader {
        number,
        timestamp: 1_600_000_000 + number,
        difficulty: BigUint::from(difficulty),
        beneficiary: test_address(),
        extra_data: b"etchash-tests".to_vec(),
        ..Default::default()
    }
}
