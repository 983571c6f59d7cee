//! Store methods for earnings records.

use super::{time_column, EarningsRecord, LedgerTx};
use crate::{
    clock::to_millis,
    error::LedgerResult,
    types::Cents,
};
use rusqlite::{params, OptionalExtension};

impl LedgerTx<'_> {
    /// Insert unless the (ancestor, descendant, level) triple exists.
    /// Returns whether a record was created.
    pub fn insert_earnings(
        &self,
        ancestor_id:   &str,
        descendant_id: &str,
        level:         u32,
        amount:        Cents,
    ) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO earnings_record
                 (ancestor_id, descendant_id, level, amount, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ancestor_id, descendant_id, level, amount, to_millis(self.now)],
        )?;
        Ok(changed == 1)
    }

    pub fn earnings_record(
        &self,
        ancestor_id:   &str,
        descendant_id: &str,
        level:         u32,
    ) -> LedgerResult<Option<EarningsRecord>> {
        let record = self
            .tx
            .query_row(
                "SELECT ancestor_id, descendant_id, level, amount, created_at
                 FROM earnings_record
                 WHERE ancestor_id = ?1 AND descendant_id = ?2 AND level = ?3",
                params![ancestor_id, descendant_id, level],
                |r| {
                    Ok(EarningsRecord {
                        ancestor_id:   r.get(0)?,
                        descendant_id: r.get(1)?,
                        level:         r.get(2)?,
                        amount:        r.get(3)?,
                        created_at:    time_column(r, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn earnings_for(&self, ancestor_id: &str) -> LedgerResult<Vec<EarningsRecord>> {
        let mut stmt = self.tx.prepare(
            "SELECT ancestor_id, descendant_id, level, amount, created_at
             FROM earnings_record
             WHERE ancestor_id = ?1
             ORDER BY level ASC, created_at ASC, descendant_id ASC",
        )?;
        let rows = stmt.query_map(params![ancestor_id], |r| {
            Ok(EarningsRecord {
                ancestor_id:   r.get(0)?,
                descendant_id: r.get(1)?,
                level:         r.get(2)?,
                amount:        r.get(3)?,
                created_at:    time_column(r, 4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sum of all accrued amounts for an ancestor. Matches the summary's
    /// total earnings.
    pub fn earnings_total(&self, ancestor_id: &str) -> LedgerResult<Cents> {
        let total: Cents = self.tx.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM earnings_record WHERE ancestor_id = ?1",
            params![ancestor_id],
            |r| r.get(0),
        )?;
        Ok(total)
    }
}
