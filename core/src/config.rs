use crate::types::{Cents, LEVELS_PER_TIER};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the engine config file inside a data directory.
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry:  RetryConfig,
    #[serde(default)]
    pub store:  StoreConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per write transaction before `ConcurrencyExhausted`.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { busy_timeout_ms: 5_000 }
    }
}

/// How a level's payout is turned into earnings records.
///
/// Records are always keyed (ancestor, contributing descendant, absolute
/// level); the formula only decides the amount on each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutFormula {
    /// Each contributing descendant is worth the full level amount.
    PerDescendant,
    /// The level amount is split evenly across the contributing
    /// descendants; the remainder goes to the oldest contributors.
    SplitPromotion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    pub formula:        PayoutFormula,
    /// Used for levels missing from `level_amounts`.
    #[serde(default)]
    pub default_amount: Cents,
    /// Tier-relative level (1..=10) -> amount.
    #[serde(default)]
    pub level_amounts:  BTreeMap<u32, Cents>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            formula:        PayoutFormula::SplitPromotion,
            default_amount: 0,
            level_amounts:  BTreeMap::new(),
        }
    }
}

impl PayoutConfig {
    /// Configured amount for a tier-relative level. Zero means no payout.
    pub fn amount_for(&self, level: u32) -> Cents {
        self.level_amounts
            .get(&level)
            .copied()
            .unwrap_or(self.default_amount)
    }

    /// Per-contributor amounts, in contributor order, for promoting out of
    /// `level` with `contributors` credited descendants.
    pub fn split(&self, level: u32, contributors: usize) -> Vec<Cents> {
        let amount = self.amount_for(level);
        if amount <= 0 || contributors == 0 {
            return Vec::new();
        }
        match self.formula {
            PayoutFormula::PerDescendant => vec![amount; contributors],
            PayoutFormula::SplitPromotion => {
                let n = contributors as i64;
                let (share, remainder) = (amount / n, amount % n);
                (0..n)
                    .map(|i| share + i64::from(i < remainder))
                    .filter(|a| *a > 0)
                    .collect()
            }
        }
    }
}

impl EngineConfig {
    /// Load `engine.json` from a data directory.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = Path::new(data_dir).join(ENGINE_CONFIG_FILE);
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.payout.default_amount < 0 {
            bail!("payout.default_amount must not be negative");
        }
        for (level, amount) in &self.payout.level_amounts {
            if !(1..=LEVELS_PER_TIER).contains(level) {
                bail!("payout.level_amounts key {level} is outside 1..={LEVELS_PER_TIER}");
            }
            if *amount < 0 {
                bail!("payout amount for level {level} must not be negative");
            }
        }
        Ok(())
    }

    /// Deterministic config for tests: level 1 pays 100 split across its
    /// contributors, level 2 pays 400.
    pub fn default_test() -> Self {
        Self {
            retry: RetryConfig { max_attempts: 5 },
            store: StoreConfig { busy_timeout_ms: 5_000 },
            payout: PayoutConfig {
                formula:        PayoutFormula::SplitPromotion,
                default_amount: 0,
                level_amounts:  [(1, 100), (2, 400)].into(),
            },
        }
    }
}
