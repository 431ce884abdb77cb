//! Chain-tip acceptance.
//!
//! The storage layer asks a [`TipAcceptance`] whether a candidate header
//! should replace the current head. The base rule is heaviest total
//! difficulty; [`GuardedTipAcceptance`] adds the antigravity reorg guard
//! while artificial finality is switched on.

use crate::finality::ArtificialFinality;
use crate::{ChainError, ChainResult};
use etchash_consensus::{should_reject_reorg, BlockHeader, ReorgContext};
use num_bigint::BigUint;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether a candidate header becomes the new chain head.
pub trait TipAcceptance: Send + Sync {
    /// Whether `candidate` should replace `current`.
    fn accept(&self, current: &BlockHeader, candidate: &BlockHeader) -> bool;
}

/// Finds the most recent header shared by two chains.
pub trait AncestorLookup: Send + Sync {
    /// Common ancestor of `current` and `candidate`, with its total difficulty.
    fn common_ancestor(
        &self,
        current: &BlockHeader,
        candidate: &BlockHeader,
    ) -> ChainResult<BlockHeader>;
}

fn total_difficulty(header: &BlockHeader) -> ChainResult<&BigUint> {
    header
        .total_difficulty
        .as_ref()
        .ok_or(ChainError::MissingTotalDifficulty(header.number))
}

/// Heaviest-chain rule: strictly more total difficulty wins.
///
/// A header without a known total difficulty never wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalDifficultyRule;

impl TipAcceptance for TotalDifficultyRule {
    fn accept(&self, current: &BlockHeader, candidate: &BlockHeader) -> bool {
        match (total_difficulty(current), total_difficulty(candidate)) {
            (Ok(current_td), Ok(candidate_td)) => candidate_td > current_td,
            _ => false,
        }
    }
}

/// Total-difficulty rule combined with the antigravity reorg guard.
pub struct GuardedTipAcceptance<A> {
    base: TotalDifficultyRule,
    finality: Arc<ArtificialFinality>,
    ancestors: A,
}

impl<A: AncestorLookup> GuardedTipAcceptance<A> {
    /// Create a predicate consulting `finality` and `ancestors`.
    pub fn new(finality: Arc<ArtificialFinality>, ancestors: A) -> Self {
        Self {
            base: TotalDifficultyRule,
            finality,
            ancestors,
        }
    }

    /// The finality switch.
    pub fn finality(&self) -> &Arc<ArtificialFinality> {
        &self.finality
    }

    /// Reorg context for replacing `current` with `candidate`.
    pub fn reorg_context(
        &self,
        current: &BlockHeader,
        candidate: &BlockHeader,
    ) -> ChainResult<ReorgContext> {
        let ancestor = self.ancestors.common_ancestor(current, candidate)?;
        Ok(ReorgContext {
            common_ancestor_td: total_difficulty(&ancestor)?.clone(),
            local_td: total_difficulty(current)?.clone(),
            proposed_td: total_difficulty(candidate)?.clone(),
            common_ancestor_time: ancestor.timestamp,
            local_head_time: current.timestamp,
        })
    }

    /// Evaluate a head change, reporting lookup failures.
    pub fn evaluate(&self, current: &BlockHeader, candidate: &BlockHeader) -> ChainResult<bool> {
        if !self.base.accept(current, candidate) {
            return Ok(false);
        }
        if !self.finality.is_enabled() {
            return Ok(true);
        }

        let ctx = self.reorg_context(current, candidate)?;
        if should_reject_reorg(&ctx) {
            info!(
                current = current.number,
                candidate = candidate.number,
                time_delta = ctx.time_delta(),
                "Reorg rejected by artificial finality"
            );
            return Ok(false);
        }

        debug!(
            current = current.number,
            candidate = candidate.number,
            "Reorg passed artificial finality"
        );
        Ok(true)
    }
}

impl<A: AncestorLookup> TipAcceptance for GuardedTipAcceptance<A> {
    /// Lookup failures while the guard is on reject the candidate.
    fn accept(&self, current: &BlockHeader, candidate: &BlockHeader) -> bool {
        self.evaluate(current, candidate).unwrap_or_else(|e| {
            warn!(candidate = candidate.number, "Rejecting candidate head: {}", e);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchash_consensus::H256;
    use std::collections::HashMap;

    /// Headers by hash; walks parent links to find the fork point.
    #[derive(Default)]
    struct MemoryChain {
        headers: HashMap<H256, BlockHeader>,
    }

    impl MemoryChain {
        fn insert(&mut self, header: BlockHeader) {
            self.headers.insert(header.hash(), header);
        }

        fn ancestors(&self, header: &BlockHeader) -> Vec<H256> {
            let mut out = vec![header.hash()];
            let mut cursor = header.clone();
            while let Some(parent) = self.headers.get(&cursor.parent_hash) {
                out.push(parent.hash());
                cursor = parent.clone();
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
            let current_chain = self.ancestors(current);
            self.ancestors(candidate)
                .into_iter()
                .find(|hash| current_chain.contains(hash))
                .and_then(|hash| self.headers.get(&hash).cloned())
                .ok_or_else(|| ChainError::AncestorNotFound {
                    current: hex::encode(current.hash()),
                    candidate: hex::encode(candidate.hash()),
                })
        }
    }

    fn child(parent: &BlockHeader, difficulty: u64, dt: u64, tag: u8) -> BlockHeader {
        let td = parent.total_difficulty.clone().unwrap_or_default() + difficulty;
        BlockHeader {
            number: parent.number + 1,
            timestamp: parent.timestamp + dt,
            parent_hash: parent.hash(),
            difficulty: BigUint::from(difficulty),
            total_difficulty: Some(td),
            extra_data: vec![tag],
            ..Default::default()
        }
    }

    fn genesis() -> BlockHeader {
        BlockHeader {
            timestamp: 1_000_000,
            difficulty: BigUint::from(100u32),
            total_difficulty: Some(BigUint::from(100u32)),
            ..Default::default()
        }
    }

    /// Local chain of `local_len` blocks and a rival of `rival_len` blocks
    /// forking at genesis.
    fn fork(
        local_len: usize,
        local_dt: u64,
        rival_len: usize,
        rival_difficulty: u64,
    ) -> (MemoryChain, BlockHeader, BlockHeader) {
        let mut chain = MemoryChain::default();
        let g = genesis();
        chain.insert(g.clone());

        let mut local = g.clone();
        for _ in 0..local_len {
            local = child(&local, 100, local_dt, 1);
            chain.insert(local.clone());
        }
        let mut rival = g;
        for _ in 0..rival_len {
            rival = child(&rival, rival_difficulty, 13, 2);
            chain.insert(rival.clone());
        }
        (chain, local, rival)
    }

    #[test]
    fn test_total_difficulty_rule() {
        let rule = TotalDifficultyRule;
        let g = genesis();
        let heavier = child(&g, 10, 13, 0);
        assert!(rule.accept(&g, &heavier));
        assert!(!rule.accept(&heavier, &g));
        assert!(!rule.accept(&g, &g));

        let mut unknown = heavier.clone();
        unknown.total_difficulty = None;
        assert!(!rule.accept(&g, &unknown));
    }

    #[test]
    fn test_guard_disabled_follows_total_difficulty() {
        let (chain, local, rival) = fork(10, 600, 11, 100);
        let guard = GuardedTipAcceptance::new(Arc::new(ArtificialFinality::new(false)), chain);
        assert!(guard.accept(&local, &rival));
    }

    #[test]
    fn test_guard_rejects_old_fork_with_marginal_work() {
        let (chain, local, rival) = fork(10, 600, 11, 100);
        let guard = GuardedTipAcceptance::new(Arc::new(ArtificialFinality::new(true)), chain);
        assert!(!guard.accept(&local, &rival));
    }

    #[test]
    fn test_guard_accepts_overwhelming_work() {
        // 6000 s fork: antigravity well under 32x
        let (chain, local, rival) = fork(10, 600, 1, 100 * 10 * 32);
        let guard = GuardedTipAcceptance::new(Arc::new(ArtificialFinality::new(true)), chain);
        assert!(guard.accept(&local, &rival));
    }

    #[test]
    fn test_guard_never_rejects_extension() {
        let (mut chain, local, _) = fork(10, 3_000, 0, 100);
        let next = child(&local, 100, 13, 1);
        chain.insert(next.clone());
        let guard = GuardedTipAcceptance::new(Arc::new(ArtificialFinality::new(true)), chain);
        assert!(guard.accept(&local, &next));
    }

    #[test]
    fn test_guard_missing_ancestor_rejects() {
        let (_, local, rival) = fork(3, 600, 4, 100);
        let guard = GuardedTipAcceptance::new(
            Arc::new(ArtificialFinality::new(true)),
            MemoryChain::default(),
        );
        assert!(matches!(
            guard.evaluate(&local, &rival),
            Err(ChainError::AncestorNotFound { .. })
        ));
        assert!(!guard.accept(&local, &rival));
    }

    #[test]
    fn test_toggling_finality_changes_decision() {
        let (chain, local, rival) = fork(10, 600, 11, 100);
        let finality = Arc::new(ArtificialFinality::new(true));
        let guard = GuardedTipAcceptance::new(Arc::clone(&finality), chain);
        assert!(!guard.accept(&local, &rival));
        finality.disable();
        assert!(guard.accept(&local, &rival));
    }
}
