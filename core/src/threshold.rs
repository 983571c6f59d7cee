//! Threshold policy: completed placements required per side to promote
//! out of a level.
//!
//! The capacity resets to 2 at the first level of every tier and doubles
//! with each level deeper into the tier: 2, 4, 8, ... 1024.

use crate::types::LEVELS_PER_TIER;

/// Completed placements needed on each side to leave `level`.
///
/// `level` may be tier-relative (1..=10) or absolute; both give the same
/// answer because the policy is periodic per tier.
pub fn threshold(level: u32) -> u32 {
    let r = (level.saturating_sub(1) % LEVELS_PER_TIER) + 1;
    if r == 1 {
        2
    } else {
        1 << r
    }
}
