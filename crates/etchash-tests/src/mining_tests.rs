//! Mining tests across the solver, worker pool, remote coordinator and
//! the `Miner` facade.

use crate::generators::mining_header;
use crate::harness::{tiny_cache, verifier};
use etchash_consensus::{seed_hash, target_for, BlockHeader, EpochCache, H256};
use etchash_mining::{
    try_solve_batch, EthashSolver, Miner, MinerConfig, MiningError, MiningTask, MiningWork,
    PowSolution, RemoteSealer, WorkerPool, RECENT_WORK_CAPACITY,
};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Nonce and mix digest sealing `header`, found by scanning from zero.
fn solve(cache: &EpochCache, header: &BlockHeader) -> (u64, H256) {
    let ws = cache.get(header.number).unwrap();
    let target = target_for(&header.difficulty);
    let counter = AtomicU64::new(0);
    let seal = try_solve_batch(&ws, &header.pow_hash(), &target, 0, 1 << 20, &counter)
        .expect("seal within batch");
    (seal.nonce, seal.mix_digest)
}

fn remote() -> (Arc<EpochCache>, RemoteSealer, mpsc::UnboundedReceiver<BlockHeader>) {
    let cache = tiny_cache();
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::clone(&cache), RemoteSealer::new(cache, tx), rx)
}

// ============================================================================
// Solver Tests
// ============================================================================

#[test]
fn test_solver_seal_verifies() {
    let cache = tiny_cache();
    let solver = EthashSolver::new(Arc::clone(&cache)).with_batch_size(16);
    let header = mining_header(7, 8);

    let sealed = solver
        .mine(&header, Some(0), &AtomicBool::new(false))
        .unwrap()
        .unwrap();

    assert_eq!(sealed.pow_hash(), header.pow_hash());
    verifier(&cache).verify_seal(&sealed).unwrap();
}

#[test]
fn test_solver_is_deterministic_from_fixed_start() {
    let cache = tiny_cache();
    let solver = EthashSolver::new(cache);
    let header = mining_header(9, 16);
    let cancel = AtomicBool::new(false);

    let a = solver.mine(&header, Some(1_000), &cancel).unwrap().unwrap();
    let b = solver.mine(&header, Some(1_000), &cancel).unwrap().unwrap();
    assert_eq!(a.nonce, b.nonce);
    assert_eq!(a.mix_digest, b.mix_digest);
}

// ============================================================================
// Worker Pool Tests
// ============================================================================

#[tokio::test]
async fn test_worker_pool_finds_verifiable_seal() {
    let cache = tiny_cache();
    let pool = WorkerPool::new(2).unwrap();
    let header = mining_header(3, 4);
    pool.broadcast_task(MiningTask::new(1, header.clone(), cache.get(3).unwrap()));

    let found = tokio::time::timeout(Duration::from_secs(60), pool.recv_solution())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.task.id, 1);
    let sealed = found.sealed_header();
    verifier(&cache).verify_seal(&sealed).unwrap();
    assert!(pool.total_hash_count() >= 1);

    pool.shutdown();
}

#[tokio::test]
async fn test_worker_pool_idles_without_task() {
    let pool = WorkerPool::new(1).unwrap();
    assert_eq!(pool.current_task_id(), None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pool.try_recv_solution().is_none());
    assert_eq!(pool.total_hash_count(), 0);
    pool.shutdown();
}

// ============================================================================
// Remote Coordinator Tests
// ============================================================================

#[test]
fn test_remote_work_package() {
    let (_, sealer, _rx) = remote();
    assert!(matches!(sealer.get_work(), Err(MiningError::WorkUnavailable)));

    let header = mining_header(30_001, 2);
    let work = sealer.submit_block(header.clone());
    assert_eq!(sealer.get_work().unwrap(), work);
    assert_eq!(work.seed_hash, seed_hash(1));
    assert_eq!(work.target, BigUint::from(1u32) << 255);

    let [pow_hash, seed, target, number] = work.to_hex();
    assert_eq!(pow_hash, format!("0x{}", hex::encode(header.pow_hash())));
    assert_eq!(seed, format!("0x{}", hex::encode(seed_hash(1))));
    assert_eq!(target, format!("0x8{}", "0".repeat(63)));
    assert_eq!(number, "0x7531");
}

#[test]
fn test_remote_difficulty_one_target_clamped() {
    let work = MiningWork {
        pow_hash: [0u8; 32],
        seed_hash: [0u8; 32],
        target: BigUint::from(1u32) << 256,
        number: 0,
    };
    assert_eq!(work.to_hex()[2], format!("0x{}", "f".repeat(64)));
}

#[test]
fn test_remote_accepts_solution_and_clears_work() {
    let (cache, sealer, mut rx) = remote();
    let header = mining_header(12, 4);
    let work = sealer.submit_block(header.clone());

    let (nonce, mix) = solve(&cache, &header);
    assert!(sealer
        .submit_work(&nonce.to_be_bytes(), &work.pow_hash, &mix)
        .unwrap());

    let sealed = rx.try_recv().unwrap();
    assert_eq!(sealed.nonce, nonce);
    assert_eq!(sealed.mix_digest, mix);
    assert!(sealer.current_block().is_none());
    assert!(matches!(sealer.get_work(), Err(MiningError::WorkUnavailable)));
}

#[test]
fn test_remote_accepts_superseded_work() {
    let (cache, sealer, mut rx) = remote();
    let old = mining_header(20, 2);
    let old_work = sealer.submit_block(old.clone());
    let new_work = sealer.submit_block(mining_header(21, 2));

    let (nonce, mix) = solve(&cache, &old);
    assert!(sealer
        .submit_work(&nonce.to_be_bytes(), &old_work.pow_hash, &mix)
        .unwrap());
    assert_eq!(rx.try_recv().unwrap().number, 20);

    // The newer work stays current.
    assert_eq!(sealer.get_work().unwrap(), new_work);
}

#[test]
fn test_remote_forgets_evicted_work() {
    let (cache, sealer, _rx) = remote();
    let first = mining_header(40, 1);
    let first_work = sealer.submit_block(first.clone());

    for i in 0..RECENT_WORK_CAPACITY as u64 {
        sealer.submit_block(mining_header(41 + i, 1));
    }
    assert_eq!(sealer.recent_len(), RECENT_WORK_CAPACITY);

    let (nonce, mix) = solve(&cache, &first);
    assert!(!sealer
        .submit_work(&nonce.to_be_bytes(), &first_work.pow_hash, &mix)
        .unwrap());
}

#[test]
fn test_remote_rejects_bad_solutions() {
    let (cache, sealer, mut rx) = remote();
    let header = mining_header(50, 1);
    let work = sealer.submit_block(header.clone());

    // Unknown work.
    assert!(!sealer
        .submit_work(&0u64.to_be_bytes(), &[9u8; 32], &[0u8; 32])
        .unwrap());

    // Wrong mix digest.
    let (nonce, mut mix) = solve(&cache, &header);
    mix[31] ^= 1;
    assert!(!sealer
        .submit_work(&nonce.to_be_bytes(), &work.pow_hash, &mix)
        .unwrap());

    // Malformed fields.
    assert!(matches!(
        sealer.submit_work(&[0u8; 7], &work.pow_hash, &mix),
        Err(MiningError::InvalidParams(_))
    ));
    assert!(matches!(
        sealer.submit_work(&[0u8; 8], &[0u8; 31], &mix),
        Err(MiningError::InvalidParams(_))
    ));
    assert!(matches!(
        sealer.submit_work(&[0u8; 8], &work.pow_hash, &[0u8; 33]),
        Err(MiningError::InvalidParams(_))
    ));

    assert!(rx.try_recv().is_err());
    assert!(sealer.get_work().is_ok());
}

#[test]
fn test_nonce_is_big_endian_on_the_wire() {
    let solution =
        PowSolution::from_bytes(&[0, 0, 0, 0, 0, 0, 1, 2], &[1u8; 32], &[2u8; 32]).unwrap();
    assert_eq!(solution.nonce, 0x0102);
}

#[test]
fn test_remote_hashrate_sum() {
    let (_, sealer, _rx) = remote();
    assert_eq!(sealer.hashrate(), 0);
    sealer.submit_hashrate([1u8; 32], 100);
    sealer.submit_hashrate([2u8; 32], 250);
    sealer.submit_hashrate([1u8; 32], 150);
    assert_eq!(sealer.hashrate(), 400);
}

// ============================================================================
// Miner Tests
// ============================================================================

#[tokio::test]
async fn test_miner_remote_round_trip() {
    let cache = tiny_cache();
    let miner = Miner::new(MinerConfig::default(), Arc::clone(&cache)).unwrap();
    miner.start();

    let header = mining_header(60, 2);
    miner.submit_block(header.clone()).await.unwrap();
    let work = miner.get_work().unwrap();
    let (nonce, mix) = solve(&cache, &header);

    assert!(!miner
        .submit_work(&nonce.to_be_bytes(), &work.pow_hash, &[0u8; 32])
        .unwrap());
    assert!(miner
        .submit_work(&nonce.to_be_bytes(), &work.pow_hash, &mix)
        .unwrap());

    let sealed = tokio::time::timeout(Duration::from_secs(5), miner.next_sealed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sealed.pow_hash(), header.pow_hash());
    assert!(verifier(&cache).validate(&sealed));

    let stats = miner.stats();
    assert_eq!(stats.blocks_submitted, 1);
    assert_eq!(stats.solutions_received, 2);
    assert_eq!(stats.valid_solutions, 1);
    assert_eq!(stats.invalid_solutions, 1);
    assert_eq!(stats.blocks_mined, 1);
}

#[tokio::test]
async fn test_miner_local_and_remote_together() {
    let cache = tiny_cache();
    let config = MinerConfig {
        internal_mining: true,
        external_mining: true,
        threads: 2,
    };
    let miner = Miner::new(config, Arc::clone(&cache)).unwrap();
    miner.start();

    miner.submit_block(mining_header(70, 1)).await.unwrap();
    assert!(miner.get_work().is_ok());

    let sealed = tokio::time::timeout(Duration::from_secs(60), miner.next_sealed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sealed.number, 70);
    verifier(&cache).verify_seal(&sealed).unwrap();
    // Sealed locally, so external miners no longer see it.
    assert!(miner.get_work().is_err());

    miner.shutdown();
}

#[tokio::test]
async fn test_miner_newer_block_supersedes_local_task() {
    let cache = tiny_cache();
    let config = MinerConfig {
        internal_mining: true,
        external_mining: false,
        threads: 1,
    };
    let miner = Miner::new(config, Arc::clone(&cache)).unwrap();
    miner.start();

    let mut hard = mining_header(80, 1);
    hard.difficulty = BigUint::from(1u32) << 200;
    miner.submit_block(hard).await.unwrap();
    miner.submit_block(mining_header(81, 2)).await.unwrap();

    let sealed = tokio::time::timeout(Duration::from_secs(60), miner.next_sealed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sealed.number, 81);

    miner.shutdown();
}
