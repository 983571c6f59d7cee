//! Completion: a placement counts once its descendant becomes eligible.
//!
//! The pending -> finished flip is a conditional update on the current
//! status, so replays and concurrent retries credit the counter at most
//! once. The eligibility flag on the user summary is kept in step.

use crate::{
    error::LedgerResult,
    event::{LedgerEvent, Outbox},
    store::{LedgerTx, ReferralEdge, UserRecord},
    types::{Position, Side, UserId},
};

/// Which counter to evaluate after a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub ancestor_id:    UserId,
    pub position:       Position,
    /// False when the edge was already finished by an earlier delivery.
    pub newly_finished: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompletionTracker;

impl CompletionTracker {
    /// Finish the descendant's edge to its referring ancestor.
    ///
    /// Returns None when there is nothing to complete: unknown user, no
    /// referring ancestor, or never placed.
    pub fn mark_eligible(
        &self,
        tx:            &LedgerTx<'_>,
        descendant_id: &str,
        outbox:        &mut Outbox,
    ) -> LedgerResult<Option<CompletionOutcome>> {
        let Some(user) = tx.user(descendant_id)? else {
            log::debug!("eligibility for unknown user {descendant_id} ignored");
            return Ok(None);
        };
        if !user.eligible {
            tx.set_eligible(descendant_id, true)?;
        }
        self.finish_in_parent(tx, &user, outbox)
    }

    /// Shared by eligibility and by promotion cascading into the parent.
    pub(crate) fn finish_in_parent(
        &self,
        tx:     &LedgerTx<'_>,
        user:   &UserRecord,
        outbox: &mut Outbox,
    ) -> LedgerResult<Option<CompletionOutcome>> {
        let Some(ancestor_id) = user.ancestor_id.as_deref() else {
            return Ok(None);
        };
        let Some(edge) = tx.edge(ancestor_id, &user.user_id)? else {
            log::debug!("{} has no edge under {ancestor_id} yet", user.user_id);
            return Ok(None);
        };

        if edge.is_finished() || !tx.finish_edge(ancestor_id, &user.user_id)? {
            return Ok(Some(CompletionOutcome {
                ancestor_id:    ancestor_id.to_string(),
                position:       edge.position,
                newly_finished: false,
            }));
        }

        let position = self.credit(tx, &edge)?;
        outbox.emit(
            tx,
            LedgerEvent::PlacementCompleted {
                ancestor_id:   ancestor_id.to_string(),
                descendant_id: user.user_id.clone(),
                side:          edge.side,
                tier:          position.tier,
                level:         position.level,
            },
        )?;
        Ok(Some(CompletionOutcome {
            ancestor_id:    ancestor_id.to_string(),
            position,
            newly_finished: true,
        }))
    }

    /// Count a just-finished edge. An edge whose level was promoted while
    /// it was pending is carried to the ancestor's active level first.
    fn credit(&self, tx: &LedgerTx<'_>, edge: &ReferralEdge) -> LedgerResult<Position> {
        let ancestor_id = edge.ancestor_id.as_str();
        let mut position = edge.position;
        let mut counter = tx.ensure_counter(ancestor_id, position)?;
        if counter.is_promoted() {
            let active = tx.active_position(ancestor_id)?;
            log::debug!(
                "{}->{} finished after {position} was promoted, crediting {active}",
                ancestor_id,
                edge.descendant_id
            );
            tx.move_edge(edge, active)?;
            position = active;
            counter = tx.ensure_counter(ancestor_id, active)?;
        }

        let (left, right) = match edge.side {
            Side::Left  => (counter.left_count + 1, counter.right_count),
            Side::Right => (counter.left_count, counter.right_count + 1),
        };
        tx.update_counter(&counter, left, right, false)?;
        Ok(position)
    }
}
