//! Store methods for level counters.

use super::{opt_time_column, time_column, LedgerTx, LevelCounter};
use crate::{
    clock::to_millis,
    error::{LedgerError, LedgerResult},
    threshold::threshold,
    types::Position,
};
use rusqlite::{params, OptionalExtension, Row};

const COUNTER_COLUMNS: &str =
    "ancestor_id, tier, level, left_count, right_count, threshold, version, promoted_at, created_at";

fn map_counter(r: &Row<'_>) -> rusqlite::Result<LevelCounter> {
    Ok(LevelCounter {
        ancestor_id: r.get(0)?,
        position:    Position::new(r.get(1)?, r.get(2)?),
        left_count:  r.get(3)?,
        right_count: r.get(4)?,
        threshold:   r.get(5)?,
        version:     r.get(6)?,
        promoted_at: opt_time_column(r, 7)?,
        created_at:  time_column(r, 8)?,
    })
}

impl LedgerTx<'_> {
    pub fn level_counter(
        &self,
        ancestor_id: &str,
        position:    Position,
    ) -> LedgerResult<Option<LevelCounter>> {
        let sql = format!(
            "SELECT {COUNTER_COLUMNS} FROM level_counter
             WHERE ancestor_id = ?1 AND tier = ?2 AND level = ?3"
        );
        let counter = self
            .tx
            .query_row(&sql, params![ancestor_id, position.tier, position.level], map_counter)
            .optional()?;
        Ok(counter)
    }

    /// Upsert: create the counter with its policy threshold if missing,
    /// then return the current row.
    pub fn ensure_counter(&self, ancestor_id: &str, position: Position) -> LedgerResult<LevelCounter> {
        self.tx.execute(
            "INSERT OR IGNORE INTO level_counter (ancestor_id, tier, level, threshold, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ancestor_id,
                position.tier,
                position.level,
                threshold(position.level),
                to_millis(self.now),
            ],
        )?;
        self.level_counter(ancestor_id, position)?.ok_or_else(|| {
            LedgerError::invariant(format!("counter {ancestor_id}/{position} missing after upsert"))
        })
    }

    /// Highest position with a counter; the start position if none exists.
    pub fn active_position(&self, ancestor_id: &str) -> LedgerResult<Position> {
        let position = self
            .tx
            .query_row(
                "SELECT tier, level FROM level_counter
                 WHERE ancestor_id = ?1
                 ORDER BY tier DESC, level DESC LIMIT 1",
                params![ancestor_id],
                |r| Ok(Position::new(r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(position.unwrap_or(Position::START))
    }

    pub fn counters_for(&self, ancestor_id: &str) -> LedgerResult<Vec<LevelCounter>> {
        let sql = format!(
            "SELECT {COUNTER_COLUMNS} FROM level_counter
             WHERE ancestor_id = ?1
             ORDER BY tier ASC, level ASC"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params![ancestor_id], map_counter)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Compare-and-swap the counts of `expected`, guarded on the version
    /// it was read at. Optionally stamps the counter as promoted.
    ///
    /// Under `BEGIN IMMEDIATE` the guard never trips; a `Conflict` here
    /// means a read went stale inside its own transaction.
    pub fn update_counter(
        &self,
        expected:    &LevelCounter,
        left_count:  u32,
        right_count: u32,
        promote:     bool,
    ) -> LedgerResult<()> {
        let promoted_at = if promote {
            Some(to_millis(self.now))
        } else {
            expected.promoted_at.map(|at| at.timestamp_millis())
        };
        let changed = self.tx.execute(
            "UPDATE level_counter
             SET left_count = ?4, right_count = ?5, promoted_at = ?6, version = version + 1
             WHERE ancestor_id = ?1 AND tier = ?2 AND level = ?3 AND version = ?7",
            params![
                expected.ancestor_id,
                expected.position.tier,
                expected.position.level,
                left_count,
                right_count,
                promoted_at,
                expected.version,
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::Conflict {
                entity: format!("level_counter {}/{}", expected.ancestor_id, expected.position),
            });
        }
        Ok(())
    }
}
