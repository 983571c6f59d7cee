//! Earnings ledger: append-only accruals, one per
//! (ancestor, contributing descendant, level).
//!
//! Idempotency of the insert is what stops a replayed promotion from
//! paying twice. Balances only move together with a newly created record.

use crate::{
    error::{LedgerError, LedgerResult},
    event::{LedgerEvent, Outbox},
    store::LedgerTx,
    types::Cents,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualOutcome {
    pub created:     bool,
    pub new_balance: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub total:        Cents,
    pub withdrawable: Cents,
    pub withdrawn:    Cents,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EarningsLedger;

impl EarningsLedger {
    pub fn accrue(
        &self,
        tx:            &LedgerTx<'_>,
        ancestor_id:   &str,
        descendant_id: &str,
        level:         u32,
        amount:        Cents,
        outbox:        &mut Outbox,
    ) -> LedgerResult<AccrualOutcome> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount { amount });
        }
        let ancestor = tx
            .user(ancestor_id)?
            .ok_or_else(|| LedgerError::UnknownAncestor { user_id: ancestor_id.to_string() })?;
        if tx.user(descendant_id)?.is_none() {
            return Err(LedgerError::UnknownDescendant { user_id: descendant_id.to_string() });
        }

        if !tx.insert_earnings(ancestor_id, descendant_id, level, amount)? {
            log::debug!("earnings {ancestor_id}/{descendant_id}/L{level} already recorded");
            return Ok(AccrualOutcome { created: false, new_balance: ancestor.balance_earnings });
        }

        let new_balance = tx.credit_earnings(ancestor_id, amount)?;
        log::info!("{ancestor_id} accrued {amount} from {descendant_id} at L{level}, balance {new_balance}");
        outbox.emit(
            tx,
            LedgerEvent::EarningsAccrued {
                ancestor_id:   ancestor_id.to_string(),
                descendant_id: descendant_id.to_string(),
                level,
                amount,
                new_balance,
            },
        )?;
        Ok(AccrualOutcome { created: true, new_balance })
    }

    /// Move `amount` from the withdrawable balance to withdrawn.
    /// Total earnings are never touched.
    pub fn withdraw(
        &self,
        tx:      &LedgerTx<'_>,
        user_id: &str,
        amount:  Cents,
        outbox:  &mut Outbox,
    ) -> LedgerResult<Cents> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount { amount });
        }
        let user = tx
            .user(user_id)?
            .ok_or_else(|| LedgerError::UnknownUser { user_id: user_id.to_string() })?;
        let Some(new_balance) = tx.debit_balance(user_id, amount)? else {
            return Err(LedgerError::InsufficientBalance {
                user_id:   user_id.to_string(),
                requested: amount,
                available: user.balance_earnings,
            });
        };
        outbox.emit(
            tx,
            LedgerEvent::EarningsWithdrawn {
                user_id: user_id.to_string(),
                amount,
                new_balance,
            },
        )?;
        Ok(new_balance)
    }

    pub fn summary(&self, tx: &LedgerTx<'_>, user_id: &str) -> LedgerResult<EarningsSummary> {
        let user = tx
            .user(user_id)?
            .ok_or_else(|| LedgerError::UnknownUser { user_id: user_id.to_string() })?;
        Ok(EarningsSummary {
            total:        user.total_earnings,
            withdrawable: user.balance_earnings,
            withdrawn:    user.withdrawn_earnings,
        })
    }
}
