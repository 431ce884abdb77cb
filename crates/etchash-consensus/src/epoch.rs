//! Epoch schedule with the ECIP-1099 epoch-length doubling.
//!
//! Before the transition block every 30000 blocks share a working set. From
//! the transition on, epochs span 60000 blocks: the dag epoch (which sizes the
//! cache and dataset) restarts at half the transition epoch, and the seed epoch
//! (which selects the seed hash) is twice the dag epoch.

use crate::params::{EPOCH_LENGTH, ECIP1099_EPOCH_LENGTH};

/// The pair of epoch numbers governing a block's working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epoch {
    /// Selects cache and dataset sizes.
    pub dag: u64,
    /// Selects the seed hash; keys the working-set cache.
    pub seed: u64,
}

/// Maps block numbers onto epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSchedule {
    transition_block: u64,
}

impl EpochSchedule {
    /// Schedule doubling the epoch length at `transition_block`.
    pub fn new(transition_block: u64) -> Self {
        Self { transition_block }
    }

    /// The ECIP-1099 transition block.
    pub fn transition_block(&self) -> u64 {
        self.transition_block
    }

    /// Whether the doubled epoch length applies at `block`.
    pub fn is_active(&self, block: u64) -> bool {
        block >= self.transition_block
    }

    /// Dag epoch of `block`.
    pub fn epoch_of(&self, block: u64) -> u64 {
        if !self.is_active(block) {
            return block / EPOCH_LENGTH;
        }
        let transition_epoch = self.transition_block / EPOCH_LENGTH;
        transition_epoch / 2 + (block - self.transition_block) / ECIP1099_EPOCH_LENGTH
    }

    /// Resolve both epoch numbers for `block`.
    pub fn describe(&self, block: u64) -> Epoch {
        let dag = self.epoch_of(block);
        Epoch {
            dag,
            seed: seed_epoch_of(dag, self.is_active(block)),
        }
    }

    /// First block of the epoch following the one containing `block`.
    ///
    /// The last pre-transition epoch is cut short at the transition block.
    pub fn next_epoch_start(&self, block: u64) -> u64 {
        if self.is_active(block) {
            let offset = (block - self.transition_block) / ECIP1099_EPOCH_LENGTH + 1;
            self.transition_block
                .saturating_add(offset.saturating_mul(ECIP1099_EPOCH_LENGTH))
        } else {
            let next = (block / EPOCH_LENGTH + 1).saturating_mul(EPOCH_LENGTH);
            next.min(self.transition_block)
        }
    }
}

/// Seed epoch for a dag epoch.
pub fn seed_epoch_of(dag_epoch: u64, active: bool) -> u64 {
    if active {
        dag_epoch * 2
    } else {
        dag_epoch
    }
}
