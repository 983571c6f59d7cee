//! Referral ledger core: binary-tree placement, completion tracking,
//! threshold promotion with overflow carry-over, and idempotent earnings.

pub mod clock;
pub mod command;
pub mod completion;
pub mod config;
pub mod earnings;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod event;
pub mod placement;
pub mod promotion;
pub mod snapshot;
pub mod store;
pub mod threshold;
pub mod types;
