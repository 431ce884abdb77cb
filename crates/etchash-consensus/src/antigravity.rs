//! Antigravity reorg scoring (ECBP-1100, "MESS").
//!
//! A competing chain must outweigh the local subchain by a factor that grows
//! with the age of the fork point: 1x for a fresh fork, up to 31x once the
//! local head is about seven hours past the common ancestor. The curve is a
//! cubic in the elapsed time, scaled by 128 so it stays integral.

use num_bigint::BigUint;
use tracing::debug;

/// Elapsed seconds at which the curve reaches its ceiling.
pub const ANTIGRAVITY_X_CAP: u64 = 25_132;

/// Curve floor (1x, scaled by 128).
pub const ANTIGRAVITY_FLOOR: u64 = 128;

/// Height of the curve above its floor.
pub const ANTIGRAVITY_AMPLITUDE: u64 = 3_840;

/// Fixed-point denominator the curve is compared against.
pub const ANTIGRAVITY_DENOMINATOR: u64 = 128;

/// Penalty for a fork point `time_delta` seconds behind the local head.
///
/// `128 + (3x^2 - 2x^3 / 25132) * 3840 / 25132^2` with `x` capped at 25132.
/// Ranges over `[128, 3968]` and never decreases as `time_delta` grows.
pub fn antigravity(time_delta: u64) -> BigUint {
    let x = BigUint::from(time_delta.min(ANTIGRAVITY_X_CAP));
    let cap = BigUint::from(ANTIGRAVITY_X_CAP);

    let x2 = &x * &x;
    let x3 = &x2 * &x;
    // 3x^2 >= 2x^3 / cap for every x <= cap
    let cubic = x2 * 3u32 - x3 * 2u32 / &cap;
    let scaled = cubic * ANTIGRAVITY_AMPLITUDE / (&cap * &cap);

    scaled + ANTIGRAVITY_FLOOR
}

/// Total difficulties and timestamps around a candidate reorg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgContext {
    /// Total difficulty at the common ancestor.
    pub common_ancestor_td: BigUint,
    /// Total difficulty at the local head.
    pub local_td: BigUint,
    /// Total difficulty at the proposed head.
    pub proposed_td: BigUint,
    /// Timestamp of the common ancestor.
    pub common_ancestor_time: u64,
    /// Timestamp of the local head.
    pub local_head_time: u64,
}

impl ReorgContext {
    /// Work added by the local chain since the fork point.
    pub fn local_subchain_td(&self) -> BigUint {
        saturating_sub(&self.local_td, &self.common_ancestor_td)
    }

    /// Work added by the proposed chain since the fork point.
    pub fn proposed_subchain_td(&self) -> BigUint {
        saturating_sub(&self.proposed_td, &self.common_ancestor_td)
    }

    /// Seconds between the fork point and the local head, floored at zero.
    pub fn time_delta(&self) -> u64 {
        self.local_head_time.saturating_sub(self.common_ancestor_time)
    }
}

fn saturating_sub(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        BigUint::default()
    }
}

/// Whether the proposed head must be refused despite its total difficulty.
///
/// Rejects iff `proposed_sub * 128 < antigravity(delta) * local_sub`. When
/// the ancestor is the local head the local subchain is empty, so chain
/// extensions always pass.
pub fn should_reject_reorg(ctx: &ReorgContext) -> bool {
    let proposed_sub = ctx.proposed_subchain_td();
    let local_sub = ctx.local_subchain_td();
    let time_delta = ctx.time_delta();
    let penalty = antigravity(time_delta);

    let reject = proposed_sub.clone() * ANTIGRAVITY_DENOMINATOR < &penalty * &local_sub;
    debug!(
        time_delta,
        antigravity = %penalty,
        local_sub = %local_sub,
        proposed_sub = %proposed_sub,
        reject,
        "Evaluated reorg"
    );
    reject
}
