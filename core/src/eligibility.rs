//! Eligibility source: the subscription/payment collaborator.

use crate::{error::LedgerResult, types::UserId};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

pub trait EligibilitySource: Send + Sync {
    fn is_eligible(&self, user_id: &str) -> LedgerResult<bool>;
}

/// Treats every user as eligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEligible;

impl EligibilitySource for AlwaysEligible {
    fn is_eligible(&self, _user_id: &str) -> LedgerResult<bool> {
        Ok(true)
    }
}

/// An in-process set of eligible users. Clones share the same set.
#[derive(Debug, Default, Clone)]
pub struct EligibleSet {
    users: Arc<RwLock<HashSet<UserId>>>,
}

impl EligibleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: &str) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user_id.to_string());
        }
    }

    pub fn revoke(&self, user_id: &str) {
        if let Ok(mut users) = self.users.write() {
            users.remove(user_id);
        }
    }
}

impl EligibilitySource for EligibleSet {
    fn is_eligible(&self, user_id: &str) -> LedgerResult<bool> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("eligibility set lock poisoned"))?;
        Ok(users.contains(user_id))
    }
}
