//! Block and uncle rewards under the ECIP-1017 era schedule.
//!
//! The base reward of 5 ETC is cut by 20% at the start of every era. Rewards
//! are decayed one era at a time with integer truncation at each step:
//! `reward = reward * 4 / 5`, never a fractional power.
//!
//! Uncles are paid by distance in era 0 (the original Ethereum formula) and
//! a flat 1/32 of the block reward from era 1 on. The including miner earns
//! a further 1/32 per uncle in every era.

use crate::chain_params::ChainParams;
use crate::header::{Address, BlockHeader};
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::{debug, warn};

/// Era-0 block reward in wei (5 * 10^18).
pub const BASE_BLOCK_REWARD: u64 = 5_000_000_000_000_000_000;

/// Zero-indexed era of `number`. Era 0 spans blocks 1..=era_length.
pub fn era(number: u64, era_length: u64) -> u64 {
    if number == 0 || era_length == 0 {
        return 0;
    }
    (number - 1) / era_length
}

/// Block reward at `number`.
pub fn block_reward(number: u64, era_length: u64) -> BigUint {
    let mut reward = BigUint::from(BASE_BLOCK_REWARD);
    if number == 0 {
        return reward;
    }
    for _ in 0..era(number, era_length) {
        reward = reward * 4u32 / 5u32;
        if reward.is_zero() {
            break;
        }
    }
    reward
}

/// Reward for an uncle at `uncle_number` included in block `number`.
///
/// Era 0 pays `reward - distance * reward / 8`, saturating at zero for
/// distances the uncle rules would reject anyway.
pub fn uncle_reward(block_reward: &BigUint, number: u64, uncle_number: u64, era: u64) -> BigUint {
    if era > 0 {
        return block_reward / 32u32;
    }

    let distance = number.saturating_sub(uncle_number);
    let penalty = BigUint::from(distance) * block_reward / 8u32;
    if penalty > *block_reward {
        warn!(number, uncle_number, "Uncle too distant, reward clamped to zero");
        return BigUint::zero();
    }
    block_reward - penalty
}

/// Nephew bonus paid to the including miner per uncle.
pub fn inclusion_reward(block_reward: &BigUint) -> BigUint {
    block_reward / 32u32
}

/// Who a reward entry pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    /// Block beneficiary, including nephew bonuses.
    Block,
    /// Uncle beneficiary.
    Uncle,
}

/// One balance credit produced by a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardEntry {
    /// Credited address.
    pub beneficiary: Address,
    /// Amount in wei.
    pub amount: BigUint,
    /// Kind of reward.
    pub kind: RewardKind,
}

/// All rewards produced by `header`. Genesis produces none.
///
/// The first entry is the block beneficiary; uncle entries follow in
/// inclusion order.
pub fn block_rewards(header: &BlockHeader, era_length: u64) -> Vec<RewardEntry> {
    if header.is_genesis() {
        return Vec::new();
    }

    let era = era(header.number, era_length);
    let reward = block_reward(header.number, era_length);
    let nephew_bonus = inclusion_reward(&reward) * header.uncles.len() as u64;

    let mut entries = Vec::with_capacity(1 + header.uncles.len());
    entries.push(RewardEntry {
        beneficiary: header.beneficiary,
        amount: &reward + nephew_bonus,
        kind: RewardKind::Block,
    });

    for uncle in &header.uncles {
        entries.push(RewardEntry {
            beneficiary: uncle.beneficiary,
            amount: uncle_reward(&reward, header.number, uncle.number, era),
            kind: RewardKind::Uncle,
        });
    }

    debug!(
        number = header.number,
        era,
        uncles = header.uncles.len(),
        reward = %reward,
        "Computed block rewards"
    );

    entries
}

/// Reward calculator bound to a chain's era length.
pub struct RewardEngine<'a> {
    params: &'a ChainParams,
}

impl<'a> RewardEngine<'a> {
    /// Create a new engine with the given chain parameters.
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Era of `number`.
    pub fn era(&self, number: u64) -> u64 {
        era(number, self.params.era_length)
    }

    /// Block reward at `number`.
    pub fn block_reward(&self, number: u64) -> BigUint {
        block_reward(number, self.params.era_length)
    }

    /// All rewards produced by `header`.
    pub fn rewards(&self, header: &BlockHeader) -> Vec<RewardEntry> {
        block_rewards(header, self.params.era_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAINNET_ERA: u64 = 5_000_000;
    const MORDOR_ERA: u64 = 2_000_000;

    fn wei(n: u64) -> BigUint {
        BigUint::from(n)
    }

    // ============ Era Tests ============

    #[test]
    fn test_era_boundaries() {
        for period in [1, 7, MORDOR_ERA, MAINNET_ERA] {
            assert_eq!(era(period, period), 0);
            assert_eq!(era(period + 1, period), 1);
        }
        assert_eq!(era(0, MAINNET_ERA), 0);
        assert_eq!(era(1, MAINNET_ERA), 0);
        assert_eq!(era(10_000_001, MAINNET_ERA), 2);
    }

    // ============ Block Reward Tests ============

    #[test]
    fn test_block_reward_era_zero() {
        for period in [MAINNET_ERA, MORDOR_ERA] {
            for number in [0, 1, 1000, period - 1, period] {
                assert_eq!(block_reward(number, period), wei(BASE_BLOCK_REWARD));
            }
        }
    }

    #[test]
    fn test_block_reward_era_one() {
        for period in [MAINNET_ERA, MORDOR_ERA] {
            assert_eq!(
                block_reward(period + 1, period),
                wei(4_000_000_000_000_000_000)
            );
        }
    }

    #[test]
    fn test_block_reward_iterative_decay() {
        assert_eq!(
            block_reward(2 * MAINNET_ERA + 1, MAINNET_ERA),
            wei(3_200_000_000_000_000_000)
        );
        assert_eq!(
            block_reward(3 * MAINNET_ERA + 1, MAINNET_ERA),
            wei(2_560_000_000_000_000_000)
        );
    }

    // ============ Uncle Reward Tests ============

    #[test]
    fn test_uncle_reward_era_zero_by_distance() {
        let reward = wei(BASE_BLOCK_REWARD);
        // distance 1: 7/8
        assert_eq!(
            uncle_reward(&reward, 100, 99, 0),
            wei(4_375_000_000_000_000_000)
        );
        // distance 2: 6/8
        assert_eq!(
            uncle_reward(&reward, 100, 98, 0),
            wei(3_750_000_000_000_000_000)
        );
        // distance 6: 2/8
        assert_eq!(
            uncle_reward(&reward, 100, 94, 0),
            wei(1_250_000_000_000_000_000)
        );
    }

    #[test]
    fn test_uncle_reward_era_zero_saturates() {
        let reward = wei(BASE_BLOCK_REWARD);
        assert_eq!(uncle_reward(&reward, 100, 80, 0), BigUint::zero());
    }

    #[test]
    fn test_uncle_reward_later_eras_flat() {
        let reward = wei(4_000_000_000_000_000_000);
        let expected = wei(125_000_000_000_000_000);
        assert_eq!(uncle_reward(&reward, 100, 99, 1), expected);
        assert_eq!(uncle_reward(&reward, 100, 94, 1), expected);
    }

    // ============ Block Reward Set Tests ============

    fn header_with_uncles(number: u64, uncle_numbers: &[u64]) -> BlockHeader {
        BlockHeader {
            number,
            beneficiary: [1u8; 20],
            uncles: uncle_numbers
                .iter()
                .enumerate()
                .map(|(i, &n)| BlockHeader {
                    number: n,
                    beneficiary: [10 + i as u8; 20],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_genesis_has_no_rewards() {
        assert!(block_rewards(&BlockHeader::default(), MAINNET_ERA).is_empty());
    }

    #[test]
    fn test_rewards_without_uncles() {
        let rewards = block_rewards(&header_with_uncles(1, &[]), MAINNET_ERA);
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].kind, RewardKind::Block);
        assert_eq!(rewards[0].amount, wei(BASE_BLOCK_REWARD));
    }

    #[test]
    fn test_rewards_with_uncles_era_zero() {
        let rewards = block_rewards(&header_with_uncles(100, &[99, 98]), MAINNET_ERA);
        assert_eq!(rewards.len(), 3);
        // 5 + 2 * 5/32
        assert_eq!(rewards[0].amount, wei(5_312_500_000_000_000_000));
        assert_eq!(rewards[1].beneficiary, [10u8; 20]);
        assert_eq!(rewards[1].amount, wei(4_375_000_000_000_000_000));
        assert_eq!(rewards[2].amount, wei(3_750_000_000_000_000_000));
    }

    #[test]
    fn test_rewards_with_uncles_era_one() {
        let number = MORDOR_ERA + 10;
        let rewards = block_rewards(&header_with_uncles(number, &[number - 1]), MORDOR_ERA);
        assert_eq!(rewards[0].amount, wei(4_125_000_000_000_000_000));
        assert_eq!(rewards[1].amount, wei(125_000_000_000_000_000));
        assert_eq!(rewards[1].kind, RewardKind::Uncle);
    }

    #[test]
    fn test_reward_engine_uses_params() {
        let params = ChainParams::mordor();
        let engine = RewardEngine::new(&params);
        assert_eq!(engine.era(MORDOR_ERA + 1), 1);
        assert_eq!(engine.block_reward(MORDOR_ERA + 1), wei(4_000_000_000_000_000_000));
    }
}
