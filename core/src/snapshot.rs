//! Tree snapshot: per-level left/right membership of one ancestor.
//!
//! Built from a single read transaction, so counts and members always
//! agree with each other.

use crate::{
    error::{LedgerError, LedgerResult},
    store::LedgerTx,
    types::{EdgeStatus, Position, Side, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub user_id:  UserId,
    pub current:  Position,
    pub levels:   Vec<LevelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub position:    Position,
    pub threshold:   u32,
    pub left_count:  u32,
    pub right_count: u32,
    pub promoted:    bool,
    pub left:        Vec<TreeMember>,
    pub right:       Vec<TreeMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMember {
    pub descendant_id: UserId,
    pub status:        EdgeStatus,
    pub placed_at:     DateTime<Utc>,
}

impl TreeSnapshot {
    pub fn capture(tx: &LedgerTx<'_>, user_id: &str) -> LedgerResult<Self> {
        let user = tx
            .user(user_id)?
            .ok_or_else(|| LedgerError::UnknownUser { user_id: user_id.to_string() })?;

        let mut levels: Vec<LevelSnapshot> = tx
            .counters_for(user_id)?
            .into_iter()
            .map(|c| LevelSnapshot {
                position:    c.position,
                threshold:   c.threshold,
                left_count:  c.left_count,
                right_count: c.right_count,
                promoted:    c.is_promoted(),
                left:        Vec::new(),
                right:       Vec::new(),
            })
            .collect();

        for edge in tx.edges_for_ancestor(user_id)? {
            let Some(level) = levels.iter_mut().find(|l| l.position == edge.position) else {
                log::warn!(
                    "{user_id}: edge to {} sits at {} which has no counter",
                    edge.descendant_id,
                    edge.position
                );
                continue;
            };
            let member = TreeMember {
                descendant_id: edge.descendant_id,
                status:        edge.status,
                placed_at:     edge.created_at,
            };
            match edge.side {
                Side::Left  => level.left.push(member),
                Side::Right => level.right.push(member),
            }
        }

        Ok(Self { user_id: user.user_id, current: user.position, levels })
    }

    pub fn level(&self, position: Position) -> Option<&LevelSnapshot> {
        self.levels.iter().find(|l| l.position == position)
    }
}
