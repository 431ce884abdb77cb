//! Local CPU mining threads.
//!
//! A [`WorkerPool`] publishes one [`MiningTask`] at a time on a `watch`
//! channel. Every [`MiningWorker`] owns a disjoint stretch of the nonce space,
//! sized by the pool, and walks it in batches, checking for newer work between
//! batches. Seals travel back over a bounded `mpsc` channel.

use crate::solver::{try_solve_batch, Seal};
use etchash_consensus::{target_for, BlockHeader, WorkingSet, H256};
use num_bigint::BigUint;
use rand::Rng;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

/// Nonces tried between checks for newer work.
const BATCH_SIZE: u64 = 256;

/// Sleep between checks while no task is published.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// A header published to the pool for sealing.
#[derive(Clone, Debug)]
pub struct MiningTask {
    /// Monotonic task id, used to discard stale solutions.
    pub id: u64,
    /// Header to seal.
    pub header: BlockHeader,
    /// Seal hash of the header.
    pub pow_hash: H256,
    /// Difficulty target.
    pub target: BigUint,
    /// Working set for the header's epoch.
    pub working_set: Arc<WorkingSet>,
}

impl MiningTask {
    /// Build a task for `header` using an already-resolved working set.
    pub fn new(id: u64, header: BlockHeader, working_set: Arc<WorkingSet>) -> Self {
        Self {
            id,
            pow_hash: header.pow_hash(),
            target: target_for(&header.difficulty),
            header,
            working_set,
        }
    }
}

/// A seal found by a worker.
#[derive(Debug)]
pub struct FoundSolution {
    /// The seal.
    pub seal: Seal,
    /// The task this seal is for.
    pub task: MiningTask,
    /// Worker that found it.
    pub worker_id: usize,
    /// Hashes spent on the task by that worker.
    pub hashes_computed: u64,
}

impl FoundSolution {
    /// The task's header with the seal applied.
    pub fn sealed_header(&self) -> BlockHeader {
        self.task.header.with_seal(self.seal.nonce, self.seal.mix_digest)
    }
}

/// Start of worker `id`'s stretch when the space is split `of` ways, plus
/// random jitter in the first half of the stretch.
fn nonce_start(id: usize, of: usize) -> u64 {
    let stretch = u64::MAX / of.max(1) as u64;
    let jitter = rand::thread_rng().gen_range(0..=stretch / 2);
    stretch.wrapping_mul(id as u64).wrapping_add(jitter)
}

/// State shared between a worker handle and its thread.
#[derive(Debug, Default)]
struct WorkerShared {
    running: AtomicBool,
    hashes: AtomicU64,
}

/// How a search over one task ended.
enum SearchEnd {
    Solved(Seal, u64),
    Superseded,
    Stopped,
    Disconnected,
}

/// One mining thread.
pub struct MiningWorker {
    id: usize,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl MiningWorker {
    /// Spawn worker `id` of `of`, following tasks on `task_rx`.
    pub fn spawn(
        id: usize,
        of: usize,
        task_rx: watch::Receiver<Option<MiningTask>>,
        solution_tx: mpsc::Sender<FoundSolution>,
    ) -> io::Result<Self> {
        let shared = Arc::new(WorkerShared {
            running: AtomicBool::new(true),
            hashes: AtomicU64::new(0),
        });
        let start = nonce_start(id, of);

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("etchash-miner-{}", id))
            .spawn(move || run(id, start, task_rx, solution_tx, &thread_shared))?;

        debug!(worker_id = id, start_nonce = start, "Mining worker spawned");
        Ok(Self {
            id,
            shared,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit after its current batch.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }

    /// Whether the thread has not been asked to stop.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Worker id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hashes computed since spawn or the last reset.
    pub fn hash_count(&self) -> u64 {
        self.shared.hashes.load(Ordering::Relaxed)
    }

    /// Reset the hash counter, returning its previous value.
    pub fn reset_hash_count(&self) -> u64 {
        self.shared.hashes.swap(0, Ordering::Relaxed)
    }

    /// Stop the thread and wait for it.
    pub fn join(mut self) -> thread::Result<()> {
        self.stop();
        self.handle.take().map_or(Ok(()), JoinHandle::join)
    }
}

impl Drop for MiningWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Thread body: wait for a task, search it, report, repeat.
fn run(
    id: usize,
    start: u64,
    mut task_rx: watch::Receiver<Option<MiningTask>>,
    solution_tx: mpsc::Sender<FoundSolution>,
    shared: &WorkerShared,
) {
    let mut next_nonce = start;

    while shared.running.load(Ordering::Relaxed) {
        let Some(task) = task_rx.borrow_and_update().clone() else {
            thread::sleep(IDLE_POLL);
            continue;
        };

        match search(&task, &mut next_nonce, &task_rx, shared) {
            SearchEnd::Solved(seal, hashes) => {
                info!(
                    worker_id = id,
                    number = task.header.number,
                    nonce = seal.nonce,
                    hashes,
                    "Found seal"
                );
                let found = FoundSolution {
                    seal,
                    task,
                    worker_id: id,
                    hashes_computed: hashes,
                };
                if solution_tx.blocking_send(found).is_err() {
                    warn!(worker_id = id, "Solution channel closed");
                    break;
                }
                wait_for_change(&task_rx, shared);
            }
            SearchEnd::Superseded => trace!(worker_id = id, "Switching to newer task"),
            SearchEnd::Stopped => break,
            SearchEnd::Disconnected => {
                debug!(worker_id = id, "Task channel closed");
                break;
            }
        }
    }

    debug!(
        worker_id = id,
        hashes = shared.hashes.load(Ordering::Relaxed),
        "Mining worker exiting"
    );
}

/// Walk the nonce space for `task` until a seal, newer work or a stop.
fn search(
    task: &MiningTask,
    next_nonce: &mut u64,
    task_rx: &watch::Receiver<Option<MiningTask>>,
    shared: &WorkerShared,
) -> SearchEnd {
    let mut spent = 0u64;
    loop {
        if !shared.running.load(Ordering::Relaxed) {
            return SearchEnd::Stopped;
        }
        match task_rx.has_changed() {
            Ok(true) => return SearchEnd::Superseded,
            Ok(false) => {}
            Err(_) => return SearchEnd::Disconnected,
        }

        let batch = AtomicU64::new(0);
        let seal = try_solve_batch(
            &task.working_set,
            &task.pow_hash,
            &task.target,
            *next_nonce,
            BATCH_SIZE,
            &batch,
        );
        let hashed = batch.load(Ordering::Relaxed);
        shared.hashes.fetch_add(hashed, Ordering::Relaxed);
        spent += hashed;
        *next_nonce = next_nonce.wrapping_add(hashed);

        if let Some(seal) = seal {
            return SearchEnd::Solved(seal, spent);
        }
    }
}

/// Idle after a seal until the pool publishes something new.
fn wait_for_change(task_rx: &watch::Receiver<Option<MiningTask>>, shared: &WorkerShared) {
    while shared.running.load(Ordering::Relaxed) && !task_rx.has_changed().unwrap_or(true) {
        thread::sleep(IDLE_POLL);
    }
}

/// Worker threads sharing one published task.
pub struct WorkerPool {
    workers: Vec<MiningWorker>,
    task_tx: watch::Sender<Option<MiningTask>>,
    solution_rx: AsyncMutex<mpsc::Receiver<FoundSolution>>,
    running: AtomicBool,
}

impl WorkerPool {
    /// Spawn `num_workers` threads (at least one).
    pub fn new(num_workers: usize) -> io::Result<Self> {
        let num_workers = num_workers.max(1);
        let (task_tx, task_rx) = watch::channel(None);
        let (solution_tx, solution_rx) = mpsc::channel(num_workers * 2);

        let workers = (0..num_workers)
            .map(|id| MiningWorker::spawn(id, num_workers, task_rx.clone(), solution_tx.clone()))
            .collect::<io::Result<Vec<_>>>()?;

        info!(num_workers, "Worker pool started");
        Ok(Self {
            workers,
            task_tx,
            solution_rx: AsyncMutex::new(solution_rx),
            running: AtomicBool::new(true),
        })
    }

    /// Publish `task`, replacing the current one.
    pub fn broadcast_task(&self, task: MiningTask) {
        debug!(task_id = task.id, number = task.header.number, "Publishing task");
        self.task_tx.send_replace(Some(task));
    }

    /// Withdraw the current task; workers go idle.
    pub fn clear_task(&self) {
        self.task_tx.send_replace(None);
    }

    /// Withdraw the current task only if it seals `pow_hash`.
    ///
    /// Returns whether a task was withdrawn.
    pub fn clear_task_for(&self, pow_hash: &H256) -> bool {
        self.task_tx.send_if_modified(|task| {
            let matches = task.as_ref().is_some_and(|t| t.pow_hash == *pow_hash);
            if matches {
                *task = None;
            }
            matches
        })
    }

    /// Id of the task currently published, if any.
    pub fn current_task_id(&self) -> Option<u64> {
        self.task_tx.borrow().as_ref().map(|task| task.id)
    }

    /// A solution if one is waiting.
    pub fn try_recv_solution(&self) -> Option<FoundSolution> {
        self.solution_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the next solution. `None` once every worker has exited.
    pub async fn recv_solution(&self) -> Option<FoundSolution> {
        self.solution_rx.lock().await.recv().await
    }

    /// Hashes computed by all workers.
    pub fn total_hash_count(&self) -> u64 {
        self.workers.iter().map(MiningWorker::hash_count).sum()
    }

    /// Reset every worker's counter, returning the combined previous value.
    pub fn reset_hash_counts(&self) -> u64 {
        self.workers.iter().map(MiningWorker::reset_hash_count).sum()
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has not been stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask every worker to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.workers.iter().for_each(MiningWorker::stop);
    }

    /// Stop every worker and join its thread.
    pub fn shutdown(self) {
        self.stop();
        for worker in self.workers {
            let id = worker.id();
            if worker.join().is_err() {
                warn!(worker_id = id, "Mining worker panicked");
            }
        }
        info!("Worker pool stopped");
    }
}
