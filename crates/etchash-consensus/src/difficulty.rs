//! Difficulty adjustment with the Classic difficulty-bomb schedule.
//!
//! The next block's difficulty is the parent's, nudged by a time-based
//! adjustment and increased by an exponential "bomb" term:
//!
//! `max(minimum, parent + adjustment * parent / divisor + bomb)`
//!
//! The adjustment formula depends on which ruleset is active at the block;
//! the bomb depends on the DieHard / Gotham / ECIP-1041 transitions. All
//! intermediate math is signed BigInt so that negative adjustments are
//! exact before clamping.

use crate::chain_params::ChainParams;
use crate::header::BlockHeader;
use crate::{ConsensusError, ConsensusResult};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use tracing::debug;

/// Blocks per bomb period.
const BOMB_PERIOD: u64 = 100_000;

/// The bomb only starts counting from this block on bomb-era chains.
const BOMB_START: u64 = 200_000;

/// Lower bound of the EIP-2 / EIP-100 time adjustment.
const MIN_ADJUSTMENT: i128 = -99;

/// Time-adjustment formula active at a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyRuleset {
    /// Earliest rules: +1 if the block came within 7 seconds, else -1.
    Olympic,
    /// Post-Olympic: +1 within 13 seconds, else -1.
    Frontier,
    /// EIP-2: `max(1 - dt / 10, -99)`.
    Homestead,
    /// EIP-100: `max((uncles ? 2 : 1) - dt / 9, -99)`.
    Byzantium,
}

/// Difficulty bomb term at `number`.
///
/// - removed (0) from `ecip1041`
/// - absent (0) on chains without `die_hard`
/// - delayed by the pause length from `gotham`
/// - frozen at the DieHard period between `die_hard` and `gotham`
/// - otherwise `2^(period - 2)` from block 200000
pub fn time_bomb(
    number: u64,
    die_hard: Option<u64>,
    gotham: Option<u64>,
    ecip1041: Option<u64>,
) -> BigUint {
    if matches!(ecip1041, Some(removal) if number >= removal) {
        return BigUint::zero();
    }

    let die_hard = match die_hard {
        Some(block) => block,
        None => return BigUint::zero(),
    };

    let period = (number / BOMB_PERIOD) as i64;

    if let Some(gotham) = gotham.filter(|&g| number >= g) {
        let delay = (gotham.saturating_sub(die_hard) / BOMB_PERIOD) as i64;
        return pow2_or_zero(period - delay - 2);
    }

    if number >= die_hard {
        return pow2_or_zero((die_hard / BOMB_PERIOD) as i64 - 2);
    }

    if number < BOMB_START {
        return BigUint::zero();
    }

    pow2_or_zero(period - 2)
}

fn pow2_or_zero(exponent: i64) -> BigUint {
    if exponent < 0 {
        BigUint::zero()
    } else {
        BigUint::one() << exponent as usize
    }
}

/// Difficulty calculator bound to a chain's parameters.
pub struct DifficultyCalculator<'a> {
    params: &'a ChainParams,
}

impl<'a> DifficultyCalculator<'a> {
    /// Create a new calculator with the given chain parameters.
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Ruleset active at `number`.
    pub fn ruleset(&self, number: u64) -> DifficultyRuleset {
        let active = |fork: Option<u64>| fork.map_or(false, |block| number >= block);

        if active(self.params.eip100_block) {
            DifficultyRuleset::Byzantium
        } else if active(self.params.eip2_block) {
            DifficultyRuleset::Homestead
        } else if active(self.params.frontier_block) {
            DifficultyRuleset::Frontier
        } else {
            DifficultyRuleset::Olympic
        }
    }

    /// Bomb term at `number` under this chain's transitions.
    pub fn time_bomb(&self, number: u64) -> BigUint {
        time_bomb(
            number,
            self.params.die_hard_block,
            self.params.gotham_block,
            self.params.ecip1041_block,
        )
    }

    /// Signed time adjustment for a block `dt` seconds after its parent.
    fn time_adjustment(
        &self,
        ruleset: DifficultyRuleset,
        parent_timestamp: u64,
        timestamp: u64,
        parent_has_uncles: bool,
    ) -> i128 {
        let parent_ts = parent_timestamp as i128;
        let ts = timestamp as i128;

        match ruleset {
            DifficultyRuleset::Byzantium => {
                let base = if parent_has_uncles { 2 } else { 1 };
                (base - (ts - parent_ts) / 9).max(MIN_ADJUSTMENT)
            }
            DifficultyRuleset::Homestead => (1 - (ts - parent_ts) / 10).max(MIN_ADJUSTMENT),
            DifficultyRuleset::Frontier => {
                if ts < parent_ts + 13 {
                    1
                } else {
                    -1
                }
            }
            DifficultyRuleset::Olympic => {
                if ts < parent_ts + 7 {
                    1
                } else {
                    -1
                }
            }
        }
    }

    /// Required difficulty for block `number`.
    pub fn calculate(
        &self,
        parent_difficulty: &BigUint,
        parent_timestamp: u64,
        timestamp: u64,
        number: u64,
        parent_has_uncles: bool,
    ) -> BigUint {
        if number == 0 {
            return self.params.genesis_difficulty().clone();
        }
        if let Some(fixed) = self.params.fixed_difficulty() {
            return fixed.clone();
        }

        let parent = BigInt::from_biguint(Sign::Plus, parent_difficulty.clone());
        let base_increase = &parent / BigInt::from(self.params.difficulty_bound_divisor);

        let ruleset = self.ruleset(number);
        let adjustment =
            self.time_adjustment(ruleset, parent_timestamp, timestamp, parent_has_uncles);
        let bomb = BigInt::from_biguint(Sign::Plus, self.time_bomb(number));

        let raw = &parent + BigInt::from(adjustment) * &base_increase + &bomb;
        let minimum = BigInt::from_biguint(Sign::Plus, self.params.minimum_difficulty.clone());
        let clamped = if raw < minimum { minimum } else { raw };

        debug!(
            number,
            ?ruleset,
            adjustment,
            bomb = %bomb,
            difficulty = %clamped,
            "Calculated difficulty"
        );

        // Non-negative after clamping to a BigUint minimum.
        clamped.to_biguint().unwrap_or_default()
    }

    /// Required difficulty for a child of `parent` sealed at `timestamp`.
    pub fn next_difficulty(&self, parent: &BlockHeader, timestamp: u64) -> BigUint {
        self.calculate(
            &parent.difficulty,
            parent.timestamp,
            timestamp,
            parent.number + 1,
            !parent.uncles.is_empty(),
        )
    }

    /// Check a header's declared difficulty against its parent.
    pub fn validate(&self, header: &BlockHeader, parent: &BlockHeader) -> ConsensusResult<()> {
        let expected = self.next_difficulty(parent, header.timestamp);
        if header.difficulty != expected {
            return Err(ConsensusError::InvalidDifficulty {
                got: header.difficulty.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }
}

/// Calculate the required difficulty for a block.
///
/// This is a convenience function that creates a DifficultyCalculator.
pub fn calculate_difficulty(
    parent_difficulty: &BigUint,
    parent_timestamp: u64,
    timestamp: u64,
    number: u64,
    parent_has_uncles: bool,
    params: &ChainParams,
) -> BigUint {
    DifficultyCalculator::new(params).calculate(
        parent_difficulty,
        parent_timestamp,
        timestamp,
        number,
        parent_has_uncles,
    )
}
