//! Miner implementation.

use crate::remote::{MiningWork, PowSolution, RemoteSealer};
use crate::solver::EthashSolver;
use crate::worker::{MiningTask, WorkerPool};
use crate::{MiningError, MiningResult};
use etchash_consensus::{BlockHeader, EpochCache, EthashVerifier, H256};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Enable internal CPU mining.
    pub internal_mining: bool,
    /// Hand out work to external miners.
    pub external_mining: bool,
    /// Number of mining threads.
    pub threads: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            internal_mining: false,
            external_mining: true,
            threads: 1,
        }
    }
}

/// Mining statistics.
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Blocks handed to the miner.
    pub blocks_submitted: u64,
    /// Solutions received from local workers or external miners.
    pub solutions_received: u64,
    /// Valid solutions.
    pub valid_solutions: u64,
    /// Invalid solutions.
    pub invalid_solutions: u64,
    /// Sealed blocks delivered.
    pub blocks_mined: u64,
}

/// Block sealer combining local workers and remote miners.
pub struct Miner {
    config: MinerConfig,
    cache: Arc<EpochCache>,
    verifier: EthashVerifier,
    solver: EthashSolver,
    remote: RemoteSealer,
    pool: Option<WorkerPool>,
    sealed_rx: AsyncMutex<mpsc::UnboundedReceiver<BlockHeader>>,
    enabled: AtomicBool,
    next_task_id: AtomicU64,
    /// Seal hash of the last block handed out by `next_sealed`.
    last_sealed: Mutex<Option<H256>>,
    stats: RwLock<MiningStats>,
}

impl Miner {
    /// Create a new miner. Spawns the worker pool when internal mining is on.
    pub fn new(config: MinerConfig, cache: Arc<EpochCache>) -> MiningResult<Self> {
        let pool = if config.internal_mining {
            let pool = WorkerPool::new(config.threads).map_err(|e| {
                MiningError::SealingFailed(format!("failed to spawn mining workers: {}", e))
            })?;
            Some(pool)
        } else {
            None
        };

        let (sealed_tx, sealed_rx) = mpsc::unbounded_channel();

        Ok(Self {
            verifier: EthashVerifier::new(Arc::clone(&cache)),
            solver: EthashSolver::new(Arc::clone(&cache)),
            remote: RemoteSealer::new(Arc::clone(&cache), sealed_tx),
            cache,
            config,
            pool,
            sealed_rx: AsyncMutex::new(sealed_rx),
            enabled: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
            last_sealed: Mutex::new(None),
            stats: RwLock::new(MiningStats::default()),
        })
    }

    /// Enable mining.
    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Mining enabled");
    }

    /// Disable mining. Local workers go idle and remote work is withdrawn.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(pool) = &self.pool {
            pool.clear_task();
        }
        self.remote.clear();
        info!("Mining disabled");
    }

    /// Check if mining is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Configuration in use.
    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Start sealing `header`, superseding any previous block.
    ///
    /// Schedules the working sets of the header's epoch and the one after it
    /// in the background. Local workers start once the current epoch's set is
    /// built; that build runs on the blocking pool.
    pub async fn submit_block(&self, header: BlockHeader) -> MiningResult<()> {
        if !self.is_enabled() {
            return Err(MiningError::SealingFailed("mining not enabled".to_string()));
        }

        self.stats.write().blocks_submitted += 1;
        let number = header.number;
        let next_epoch = self.cache.schedule().next_epoch_start(number);
        self.cache.ensure_range(number, next_epoch);

        if self.config.external_mining {
            self.remote.submit_block(header.clone());
        }

        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let working_set = match self.cache.get_if_ready(number) {
            Some(working_set) => working_set,
            None => {
                let cache = Arc::clone(&self.cache);
                tokio::task::spawn_blocking(move || cache.get(number))
                    .await
                    .map_err(|e| {
                        MiningError::SealingFailed(format!("working set build aborted: {}", e))
                    })??
            }
        };

        // A newer block may have arrived while the working set was built.
        if self.next_task_id.load(Ordering::SeqCst) != id + 1 {
            debug!(task_id = id, number, "Block superseded before publishing");
            return Ok(());
        }
        pool.broadcast_task(MiningTask::new(id, header, working_set));
        Ok(())
    }

    /// Current work for external miners.
    pub fn get_work(&self) -> MiningResult<MiningWork> {
        if !self.config.external_mining {
            return Err(MiningError::WorkUnavailable);
        }
        self.remote.get_work()
    }

    /// Submit an external solution. See [`RemoteSealer::submit_work`].
    pub fn submit_work(&self, nonce: &[u8], pow_hash: &[u8], mix_digest: &[u8]) -> MiningResult<bool> {
        let solution = PowSolution::from_bytes(nonce, pow_hash, mix_digest)?;
        let accepted = self.remote.submit_solution(solution);
        if accepted {
            if let Some(pool) = &self.pool {
                pool.clear_task_for(&solution.pow_hash);
            }
        }

        let mut stats = self.stats.write();
        stats.solutions_received += 1;
        if accepted {
            stats.valid_solutions += 1;
        } else {
            stats.invalid_solutions += 1;
        }
        Ok(accepted)
    }

    /// Record an external miner's hashrate.
    pub fn submit_hashrate(&self, id: H256, rate: u64) {
        self.remote.submit_hashrate(id, rate);
    }

    /// Reported external hashrate.
    pub fn hashrate(&self) -> u64 {
        self.remote.hashrate()
    }

    /// Hashes computed by local workers since start.
    pub fn local_hash_count(&self) -> u64 {
        self.pool.as_ref().map_or(0, |pool| pool.total_hash_count())
    }

    async fn recv_local(&self) -> Option<crate::worker::FoundSolution> {
        match &self.pool {
            Some(pool) => pool.recv_solution().await,
            None => std::future::pending().await,
        }
    }

    /// Record `pow_hash` as delivered. False if it was the last one delivered.
    fn mark_delivered(&self, pow_hash: H256) -> bool {
        let mut last = self.last_sealed.lock();
        if *last == Some(pow_hash) {
            return false;
        }
        *last = Some(pow_hash);
        true
    }

    /// Wait for the next sealed block from either source.
    ///
    /// Each block is delivered once: sealing it from one source withdraws it
    /// from the other, and a second seal for the block just delivered is
    /// dropped. Local seals for superseded tasks are dropped too. A local seal
    /// that fails verification is reported as `SealingFailed`.
    pub async fn next_sealed(&self) -> MiningResult<BlockHeader> {
        loop {
            let mut sealed_rx = self.sealed_rx.lock().await;
            tokio::select! {
                remote = sealed_rx.recv() => {
                    let sealed = remote.ok_or_else(|| {
                        MiningError::SealingFailed("sealed block channel closed".to_string())
                    })?;
                    let pow_hash = sealed.pow_hash();
                    if let Some(pool) = &self.pool {
                        pool.clear_task_for(&pow_hash);
                    }
                    if !self.mark_delivered(pow_hash) {
                        debug!(number = sealed.number, "Dropping duplicate remote seal");
                        continue;
                    }
                    self.stats.write().blocks_mined += 1;
                    return Ok(sealed);
                }
                local = self.recv_local() => {
                    let found = local.ok_or_else(|| {
                        MiningError::SealingFailed("worker pool closed".to_string())
                    })?;

                    let current = self.pool.as_ref().and_then(|pool| pool.current_task_id());
                    if current != Some(found.task.id) {
                        debug!(task_id = found.task.id, "Dropping seal for stale task");
                        continue;
                    }

                    self.stats.write().solutions_received += 1;
                    let sealed = found.sealed_header();
                    if let Err(e) = self.verifier.verify_seal(&sealed) {
                        self.stats.write().invalid_solutions += 1;
                        warn!(number = sealed.number, "Local seal failed verification: {}", e);
                        return Err(MiningError::SealingFailed(e.to_string()));
                    }

                    if let Some(pool) = &self.pool {
                        pool.clear_task();
                    }
                    let pow_hash = found.task.pow_hash;
                    self.remote.withdraw(&pow_hash);
                    if !self.mark_delivered(pow_hash) {
                        debug!(number = sealed.number, "Dropping duplicate local seal");
                        continue;
                    }
                    let mut stats = self.stats.write();
                    stats.valid_solutions += 1;
                    stats.blocks_mined += 1;
                    info!(number = sealed.number, nonce = sealed.nonce, "Sealed block");
                    return Ok(sealed);
                }
            }
        }
    }

    /// Seal `header` on the calling thread.
    ///
    /// Returns `None` if `cancel` is set before a seal is found.
    pub fn seal_blocking(
        &self,
        header: &BlockHeader,
        cancel: &AtomicBool,
    ) -> MiningResult<Option<BlockHeader>> {
        let Some(sealed) = self.solver.mine(header, None, cancel)? else {
            return Ok(None);
        };

        self.verifier
            .verify_seal(&sealed)
            .map_err(|e| MiningError::SealingFailed(e.to_string()))?;

        self.stats.write().blocks_mined += 1;
        Ok(Some(sealed))
    }

    /// Get mining statistics.
    pub fn stats(&self) -> MiningStats {
        self.stats.read().clone()
    }

    /// Stop workers and wait for them to exit.
    pub fn shutdown(self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(pool) = self.pool {
            pool.shutdown();
        }
    }
}
