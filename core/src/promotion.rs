//! Promotion engine: moves an ancestor up one level once both sides of
//! its current level reach the threshold.
//!
//! One call to `evaluate` is one transaction and handles one level:
//!   1. re-check the counter (absent, already promoted, or short: no-op)
//!   2. upsert the next level's counter
//!   3. carry each side's overflow (newest finished edges) to the next level
//!   4. pin the old counter at threshold and mark it promoted
//!   5. move the user summary to the next position
//!   6. accrue earnings for the descendants that stayed credited
//!   7. finish the ancestor's own edge in its parent's tree, if pending
//!
//! Evaluating a level that is already promoted re-queues the user's active
//! level and its parent's counter, so a redelivered event completes a
//! cascade that stopped between transactions.
//!
//! Everything further up the chain is returned as follow-up work and is
//! evaluated in its own transaction after this one commits.

use crate::{
    completion::CompletionTracker,
    config::PayoutConfig,
    earnings::EarningsLedger,
    error::{LedgerError, LedgerResult},
    event::{LedgerEvent, Outbox},
    store::LedgerTx,
    types::{Position, Side, UserId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub promoted: bool,
    /// Where the user landed, when promoted.
    pub next:     Option<Position>,
}

impl PromotionResult {
    pub const NOT_PROMOTED: PromotionResult = PromotionResult { promoted: false, next: None };

    pub fn next_level(&self) -> Option<u32> {
        self.next.map(|p| p.level)
    }
}

/// A settled promotion, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub user_id: UserId,
    pub from:    Position,
    pub to:      Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionStep {
    pub result:     PromotionResult,
    /// Counters to evaluate next, each in its own transaction.
    pub follow_ups: Vec<(UserId, Position)>,
}

impl PromotionStep {
    fn idle() -> Self {
        Self { result: PromotionResult::NOT_PROMOTED, follow_ups: Vec::new() }
    }
}

pub struct PromotionEngine<'a> {
    payout: &'a PayoutConfig,
}

impl<'a> PromotionEngine<'a> {
    pub fn new(payout: &'a PayoutConfig) -> Self {
        Self { payout }
    }

    pub fn evaluate(
        &self,
        tx:       &LedgerTx<'_>,
        user_id:  &str,
        position: Position,
        outbox:   &mut Outbox,
    ) -> LedgerResult<PromotionStep> {
        let Some(counter) = tx.level_counter(user_id, position)? else {
            return Ok(PromotionStep::idle());
        };
        if counter.is_promoted() {
            log::debug!("{user_id} already promoted past {position}, re-checking downstream");
            return self.resume(tx, user_id, position, outbox);
        }
        if !counter.clears_threshold() {
            log::debug!(
                "{user_id} at {position}: left={} right={} threshold={}",
                counter.left_count,
                counter.right_count,
                counter.threshold
            );
            return Ok(PromotionStep::idle());
        }
        let user = tx
            .user(user_id)?
            .ok_or_else(|| LedgerError::UnknownUser { user_id: user_id.to_string() })?;
        if user.position > position {
            return self.resume(tx, user_id, position, outbox);
        }

        let next = position.next();
        let next_counter = tx.ensure_counter(user_id, next)?;
        let threshold = counter.threshold;

        let mut carried = [0u32; 2];
        for (slot, side) in Side::BOTH.into_iter().enumerate() {
            let overflow = counter.count(side) - threshold;
            if overflow == 0 {
                continue;
            }
            let edges = tx.recent_finished_edges(user_id, position, side, overflow)?;
            if edges.len() != overflow as usize {
                return Err(LedgerError::invariant(format!(
                    "{user_id} at {position}: {} counter is {} but only {} finished edges are credited",
                    side.as_str(),
                    counter.count(side),
                    threshold as usize + edges.len()
                )));
            }
            for edge in &edges {
                tx.move_edge(edge, next)?;
            }
            carried[slot] = overflow;
        }

        tx.update_counter(&counter, threshold, threshold, true)?;
        tx.update_counter(
            &next_counter,
            next_counter.left_count + carried[0],
            next_counter.right_count + carried[1],
            false,
        )?;
        tx.set_user_position(user_id, next)?;
        log::info!(
            "{user_id} promoted {position} -> {next} (carried left={}, right={})",
            carried[0],
            carried[1]
        );
        outbox.emit(
            tx,
            LedgerEvent::Promoted {
                user_id:   user_id.to_string(),
                new_level: next.level,
                new_tier:  next.tier,
            },
        )?;

        self.pay_contributors(tx, user_id, position, threshold, outbox)?;

        let mut follow_ups = vec![(user_id.to_string(), next)];
        if let Some(done) = CompletionTracker.finish_in_parent(tx, &user, outbox)? {
            follow_ups.push((done.ancestor_id, done.position));
        }

        Ok(PromotionStep {
            result: PromotionResult { promoted: true, next: Some(next) },
            follow_ups,
        })
    }

    /// A level that was promoted earlier. The work that promotion queued
    /// may never have run, so hand back the user's active level and the
    /// parent counter holding the user's edge. Both are no-ops when
    /// already settled.
    fn resume(
        &self,
        tx:       &LedgerTx<'_>,
        user_id:  &str,
        position: Position,
        outbox:   &mut Outbox,
    ) -> LedgerResult<PromotionStep> {
        let user = tx
            .user(user_id)?
            .ok_or_else(|| LedgerError::UnknownUser { user_id: user_id.to_string() })?;
        let mut step = PromotionStep::idle();
        if user.position > position {
            step.follow_ups.push((user_id.to_string(), user.position));
        }
        if let Some(done) = CompletionTracker.finish_in_parent(tx, &user, outbox)? {
            step.follow_ups.push((done.ancestor_id, done.position));
        }
        Ok(step)
    }

    /// The finished edges left at the promoted level are the contributors.
    fn pay_contributors(
        &self,
        tx:        &LedgerTx<'_>,
        user_id:   &str,
        position:  Position,
        threshold: u32,
        outbox:    &mut Outbox,
    ) -> LedgerResult<()> {
        let contributors = tx.finished_edges(user_id, position)?;
        if contributors.len() != 2 * threshold as usize {
            return Err(LedgerError::invariant(format!(
                "{user_id} at {position}: {} contributors after carry-over, expected {}",
                contributors.len(),
                2 * threshold
            )));
        }
        let amounts = self.payout.split(position.level, contributors.len());
        for (edge, amount) in contributors.iter().zip(amounts) {
            EarningsLedger.accrue(
                tx,
                user_id,
                &edge.descendant_id,
                position.absolute_level(),
                amount,
                outbox,
            )?;
        }
        Ok(())
    }
}
