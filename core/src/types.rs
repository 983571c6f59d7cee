//! Shared primitive types used across the entire ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stable, unique identifier for a user in the referral network.
pub type UserId = String;

/// Monetary amounts in minor currency units.
pub type Cents = i64;

/// Number of levels grouped into one tier.
pub const LEVELS_PER_TIER: u32 = 10;

/// Where an ancestor stands in the ladder: tier (1-based) and the
/// tier-relative level (1..=10).
///
/// Ordering is lexicographic on (tier, level), which is also the order of
/// promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub tier:  u32,
    pub level: u32,
}

impl Position {
    /// Every ancestor starts here.
    pub const START: Position = Position { tier: 1, level: 1 };

    pub fn new(tier: u32, level: u32) -> Self {
        Self { tier, level }
    }

    /// The position reached by one promotion. Level 10 rolls into the
    /// first level of the next tier.
    pub fn next(self) -> Self {
        if self.level >= LEVELS_PER_TIER {
            Self { tier: self.tier + 1, level: 1 }
        } else {
            Self { tier: self.tier, level: self.level + 1 }
        }
    }

    /// Level counted from the very first tier (tier 2 level 1 is 11).
    pub fn absolute_level(self) -> u32 {
        (self.tier - 1) * LEVELS_PER_TIER + self.level
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}L{}", self.tier, self.level)
    }
}

/// The two branches under an ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left  => "left",
            Self::Right => "right",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left"  => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other   => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Lifecycle of a referral edge. Moves pending -> finished exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Pending,
    Finished,
}

impl EdgeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending  => "pending",
            Self::Finished => "finished",
        }
    }
}

impl FromStr for EdgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"  => Ok(Self::Pending),
            "finished" => Ok(Self::Finished),
            other      => Err(format!("unknown edge status '{other}'")),
        }
    }
}
