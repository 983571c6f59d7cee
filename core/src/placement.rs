//! Placement: attach a referred user under an ancestor.
//!
//! A new edge lands at the ancestor's active level (highest counter) on
//! the side with fewer placements, ties going left. Placement never
//! touches counts or earnings; those only move on completion.
//!
//! Two concurrent placements can read the same side populations and
//! pick the same side. Balance is best-effort; each edge is still stored
//! exactly once.

use crate::{
    error::{LedgerError, LedgerResult},
    event::{LedgerEvent, Outbox},
    store::{LedgerTx, ReferralEdge},
    types::Side,
};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    Placed(ReferralEdge),
    /// The pair was placed before; this is the original edge.
    AlreadyPlaced(ReferralEdge),
}

impl PlacementOutcome {
    pub fn edge(&self) -> &ReferralEdge {
        match self {
            Self::Placed(edge) | Self::AlreadyPlaced(edge) => edge,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Placed(_))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlacementEngine;

impl PlacementEngine {
    pub fn place_referral(
        &self,
        tx:            &LedgerTx<'_>,
        ancestor_id:   &str,
        descendant_id: &str,
        outbox:        &mut Outbox,
    ) -> LedgerResult<PlacementOutcome> {
        if ancestor_id == descendant_id {
            return Err(LedgerError::SelfReferral { user_id: ancestor_id.to_string() });
        }
        if let Some(existing) = tx.edge(ancestor_id, descendant_id)? {
            log::debug!("{ancestor_id}->{descendant_id} already placed, returning existing edge");
            return Ok(PlacementOutcome::AlreadyPlaced(existing));
        }

        let ancestor = tx
            .user(ancestor_id)?
            .ok_or_else(|| LedgerError::UnknownAncestor { user_id: ancestor_id.to_string() })?;
        let descendant = tx
            .user(descendant_id)?
            .ok_or_else(|| LedgerError::UnknownDescendant { user_id: descendant_id.to_string() })?;

        match descendant.ancestor_id.as_deref() {
            Some(existing) if existing != ancestor_id => {
                return Err(LedgerError::AlreadyReferred {
                    descendant_id:     descendant_id.to_string(),
                    existing_ancestor: existing.to_string(),
                });
            }
            Some(_) => {}
            None => {
                self.reject_cycle(tx, ancestor.ancestor_id.as_deref(), ancestor_id, descendant_id)?;
                tx.set_ancestor(descendant_id, ancestor_id)?;
            }
        }

        let position = tx.active_position(ancestor_id)?;
        tx.ensure_counter(ancestor_id, position)?;
        let left = tx.placed_count(ancestor_id, position, Side::Left)?;
        let right = tx.placed_count(ancestor_id, position, Side::Right)?;
        let side = if left <= right { Side::Left } else { Side::Right };

        let edge = tx.insert_edge(ancestor_id, descendant_id, side, position)?;
        log::debug!(
            "placed {descendant_id} under {ancestor_id} at {position} on the {} (left={left}, right={right})",
            side.as_str()
        );
        outbox.emit(
            tx,
            LedgerEvent::ReferralPlaced {
                ancestor_id:   ancestor_id.to_string(),
                descendant_id: descendant_id.to_string(),
                side,
                tier:  position.tier,
                level: position.level,
            },
        )?;
        Ok(PlacementOutcome::Placed(edge))
    }

    /// Walk up from the ancestor; meeting the descendant means a cycle.
    fn reject_cycle(
        &self,
        tx:            &LedgerTx<'_>,
        first_parent:  Option<&str>,
        ancestor_id:   &str,
        descendant_id: &str,
    ) -> LedgerResult<()> {
        let mut seen = HashSet::new();
        let mut cursor = first_parent.map(str::to_string);
        while let Some(current) = cursor {
            if current == descendant_id {
                return Err(LedgerError::ReferralCycle {
                    ancestor_id:   ancestor_id.to_string(),
                    descendant_id: descendant_id.to_string(),
                });
            }
            if !seen.insert(current.clone()) {
                return Err(LedgerError::invariant(format!(
                    "ancestor chain of {ancestor_id} loops through {current}"
                )));
            }
            cursor = tx.user(&current)?.and_then(|u| u.ancestor_id);
        }
        Ok(())
    }
}
