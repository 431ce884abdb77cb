//! Shared, lazily-built working sets.
//!
//! Each epoch gets one slot in a map guarded by a single mutex. The mutex is
//! held only to find or insert a slot; the multi-second cache generation runs
//! inside the slot's `OnceCell`, so at most one build runs per epoch and
//! concurrent readers of the same epoch wait for it instead of repeating it.

use crate::epoch::{Epoch, EpochSchedule};
use crate::ethash::{EthashParams, WorkingSet};
use crate::ConsensusResult;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// How many epochs past the start of a range `ensure_range` will prepare.
pub const MAX_EPOCHS_AHEAD: u64 = 10;

struct Slot {
    epoch: Epoch,
    cell: OnceCell<Arc<WorkingSet>>,
}

impl Slot {
    fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            cell: OnceCell::new(),
        }
    }

    /// Return the working set, building it if this is the first caller.
    fn get_or_build(&self, params: &EthashParams) -> ConsensusResult<Arc<WorkingSet>> {
        self.cell
            .get_or_try_init(|| WorkingSet::generate(self.epoch, params).map(Arc::new))
            .map(Arc::clone)
    }
}

/// Working-set cache keyed by epoch.
///
/// The key is the full epoch descriptor: the seed epoch alone is ambiguous
/// when the transition epoch is odd, where the last short epoch and the first
/// doubled epoch share a seed but not a size.
pub struct EpochCache {
    schedule: EpochSchedule,
    params: EthashParams,
    slots: Mutex<HashMap<Epoch, Arc<Slot>>>,
}

impl EpochCache {
    /// Create an empty cache with consensus sizes.
    pub fn new(schedule: EpochSchedule) -> Self {
        Self::with_params(schedule, EthashParams::mainnet())
    }

    /// Create an empty cache with a custom size schedule.
    pub fn with_params(schedule: EpochSchedule, params: EthashParams) -> Self {
        Self {
            schedule,
            params,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The epoch schedule in use.
    pub fn schedule(&self) -> &EpochSchedule {
        &self.schedule
    }

    /// The size schedule in use.
    pub fn params(&self) -> &EthashParams {
        &self.params
    }

    /// Find or insert the slot for `epoch`. The bool is true if it was inserted.
    fn slot(&self, epoch: Epoch) -> (Arc<Slot>, bool) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&epoch) {
            return (Arc::clone(slot), false);
        }
        let slot = Arc::new(Slot::new(epoch));
        slots.insert(epoch, Arc::clone(&slot));
        (slot, true)
    }

    /// Start background builds for every epoch spanned by `[start, end]`,
    /// at most `MAX_EPOCHS_AHEAD` past the start epoch.
    ///
    /// Epochs already built or being built are skipped.
    pub fn ensure_range(&self, start: u64, end: u64) {
        let mut block = start;
        for _ in 0..=MAX_EPOCHS_AHEAD {
            if block > end {
                break;
            }

            let epoch = self.schedule.describe(block);
            let (slot, inserted) = self.slot(epoch);
            if inserted {
                self.spawn_build(slot);
            }

            let next = self.schedule.next_epoch_start(block);
            if next <= block {
                break;
            }
            block = next;
        }
    }

    fn spawn_build(&self, slot: Arc<Slot>) {
        let params = self.params;
        let epoch = slot.epoch;
        let spawned = thread::Builder::new()
            .name(format!("ethash-cache-{}", epoch.seed))
            .spawn(move || match slot.get_or_build(&params) {
                Ok(_) => info!(
                    dag_epoch = epoch.dag,
                    seed_epoch = epoch.seed,
                    "Working set ready"
                ),
                Err(e) => warn!(seed_epoch = epoch.seed, "Working set build failed: {}", e),
            });

        match spawned {
            Ok(_) => debug!(seed_epoch = epoch.seed, "Scheduled working set build"),
            // The slot stays registered; the next `get` builds it inline.
            Err(e) => warn!(seed_epoch = epoch.seed, "Failed to spawn cache builder: {}", e),
        }
    }

    /// Working set for `block`, building it on this thread if needed.
    ///
    /// Blocks while another thread is building the same epoch.
    pub fn get(&self, block: u64) -> ConsensusResult<Arc<WorkingSet>> {
        let epoch = self.schedule.describe(block);
        let (slot, _) = self.slot(epoch);
        slot.get_or_build(&self.params)
    }

    /// Working set for `block` if it is already built.
    pub fn get_if_ready(&self, block: u64) -> Option<Arc<WorkingSet>> {
        let epoch = self.schedule.describe(block);
        self.slots
            .lock()
            .get(&epoch)
            .and_then(|slot| slot.cell.get().cloned())
    }

    /// Drop working sets more than `epochs_behind` epochs older than `block`'s.
    ///
    /// Builds still running finish in their own thread and are then discarded.
    pub fn evict_before(&self, block: u64, epochs_behind: u64) {
        let current = self.schedule.describe(block);
        let step = if self.schedule.is_active(block) { 2 } else { 1 };
        let min_seed = current.seed.saturating_sub(epochs_behind.saturating_mul(step));

        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|epoch, _| epoch.seed >= min_seed);
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, min_seed, "Evicted old working sets");
        }
    }

    /// Number of epochs registered (built or in progress).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no epoch is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
