//! Store methods for referral edges.

use super::{opt_time_column, parse_column, time_column, LedgerTx, ReferralEdge};
use crate::{
    clock::to_millis,
    error::{LedgerError, LedgerResult},
    types::{EdgeStatus, Position, Side},
};
use rusqlite::{params, OptionalExtension, Row};

const EDGE_COLUMNS: &str =
    "seq, ancestor_id, descendant_id, side, tier, level, status, created_at, finished_at";

fn map_edge(r: &Row<'_>) -> rusqlite::Result<ReferralEdge> {
    Ok(ReferralEdge {
        seq:           r.get(0)?,
        ancestor_id:   r.get(1)?,
        descendant_id: r.get(2)?,
        side:          parse_column(3, r.get(3)?)?,
        position:      Position::new(r.get(4)?, r.get(5)?),
        status:        parse_column(6, r.get(6)?)?,
        created_at:    time_column(r, 7)?,
        finished_at:   opt_time_column(r, 8)?,
    })
}

impl LedgerTx<'_> {
    /// Record a pending edge and return it as stored.
    pub fn insert_edge(
        &self,
        ancestor_id:   &str,
        descendant_id: &str,
        side:          Side,
        position:      Position,
    ) -> LedgerResult<ReferralEdge> {
        self.tx.execute(
            "INSERT INTO referral_edge
                 (ancestor_id, descendant_id, side, tier, level, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ancestor_id,
                descendant_id,
                side.as_str(),
                position.tier,
                position.level,
                EdgeStatus::Pending.as_str(),
                to_millis(self.now),
            ],
        )?;
        self.edge(ancestor_id, descendant_id)?.ok_or_else(|| {
            LedgerError::invariant(format!("edge {ancestor_id}->{descendant_id} missing after insert"))
        })
    }

    pub fn edge(&self, ancestor_id: &str, descendant_id: &str) -> LedgerResult<Option<ReferralEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edge
             WHERE ancestor_id = ?1 AND descendant_id = ?2"
        );
        let edge = self
            .tx
            .query_row(&sql, params![ancestor_id, descendant_id], map_edge)
            .optional()?;
        Ok(edge)
    }

    /// Edges placed at a position on one side, whatever their status.
    pub fn placed_count(&self, ancestor_id: &str, position: Position, side: Side) -> LedgerResult<u32> {
        let n: u32 = self.tx.query_row(
            "SELECT COUNT(*) FROM referral_edge
             WHERE ancestor_id = ?1 AND tier = ?2 AND level = ?3 AND side = ?4",
            params![ancestor_id, position.tier, position.level, side.as_str()],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Flip pending -> finished. Returns false if the edge was not pending.
    pub fn finish_edge(&self, ancestor_id: &str, descendant_id: &str) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "UPDATE referral_edge SET status = ?3, finished_at = ?4
             WHERE ancestor_id = ?1 AND descendant_id = ?2 AND status = ?5",
            params![
                ancestor_id,
                descendant_id,
                EdgeStatus::Finished.as_str(),
                to_millis(self.now),
                EdgeStatus::Pending.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Re-attribute an edge to another position of the same ancestor.
    pub fn move_edge(&self, edge: &ReferralEdge, to: Position) -> LedgerResult<()> {
        let changed = self.tx.execute(
            "UPDATE referral_edge SET tier = ?2, level = ?3
             WHERE seq = ?1 AND tier = ?4 AND level = ?5",
            params![edge.seq, to.tier, to.level, edge.position.tier, edge.position.level],
        )?;
        if changed == 0 {
            return Err(LedgerError::Conflict {
                entity: format!("referral_edge {}->{}", edge.ancestor_id, edge.descendant_id),
            });
        }
        Ok(())
    }

    /// The `limit` most recently created finished edges on one side.
    pub fn recent_finished_edges(
        &self,
        ancestor_id: &str,
        position:    Position,
        side:        Side,
        limit:       u32,
    ) -> LedgerResult<Vec<ReferralEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edge
             WHERE ancestor_id = ?1 AND tier = ?2 AND level = ?3 AND side = ?4 AND status = ?5
             ORDER BY created_at DESC, seq DESC
             LIMIT ?6"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                ancestor_id,
                position.tier,
                position.level,
                side.as_str(),
                EdgeStatus::Finished.as_str(),
                limit,
            ],
            map_edge,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Finished edges credited to a position, oldest first.
    pub fn finished_edges(&self, ancestor_id: &str, position: Position) -> LedgerResult<Vec<ReferralEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edge
             WHERE ancestor_id = ?1 AND tier = ?2 AND level = ?3 AND status = ?4
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                ancestor_id,
                position.tier,
                position.level,
                EdgeStatus::Finished.as_str(),
            ],
            map_edge,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every edge under an ancestor, by position then placement order.
    pub fn edges_for_ancestor(&self, ancestor_id: &str) -> LedgerResult<Vec<ReferralEdge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edge
             WHERE ancestor_id = ?1
             ORDER BY tier ASC, level ASC, seq ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params![ancestor_id], map_edge)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn edge_count(&self) -> LedgerResult<(i64, i64)> {
        let counts = self.tx.query_row(
            "SELECT COUNT(*), COALESCE(SUM(status = 'finished'), 0) FROM referral_edge",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(counts)
    }
}
