//! Store methods for user summaries.

use super::{opt_time_column, time_column, LedgerTx, UserRecord};
use crate::{
    clock::to_millis,
    error::LedgerResult,
    types::{Cents, Position},
};
use rusqlite::{params, OptionalExtension, Row};

const USER_COLUMNS: &str = "user_id, ancestor_id, current_tier, current_level, total_earnings,
     withdrawn_earnings, balance_earnings, eligible, promoted_at, created_at";

fn map_user(r: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id:            r.get(0)?,
        ancestor_id:        r.get(1)?,
        position:           Position::new(r.get(2)?, r.get(3)?),
        total_earnings:     r.get(4)?,
        withdrawn_earnings: r.get(5)?,
        balance_earnings:   r.get(6)?,
        eligible:           r.get::<_, i32>(7)? != 0,
        promoted_at:        opt_time_column(r, 8)?,
        created_at:         time_column(r, 9)?,
    })
}

impl LedgerTx<'_> {
    /// Insert a user summary. Returns false if the user already exists.
    pub fn insert_user(&self, user_id: &str, ancestor_id: Option<&str>) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO ledger_user (user_id, ancestor_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, ancestor_id, to_millis(self.now)],
        )?;
        Ok(changed == 1)
    }

    pub fn user(&self, user_id: &str) -> LedgerResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM ledger_user WHERE user_id = ?1");
        let user = self
            .tx
            .query_row(&sql, params![user_id], map_user)
            .optional()?;
        Ok(user)
    }

    /// Record the referring ancestor. Only succeeds while none is set.
    pub fn set_ancestor(&self, user_id: &str, ancestor_id: &str) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "UPDATE ledger_user SET ancestor_id = ?2
             WHERE user_id = ?1 AND ancestor_id IS NULL",
            params![user_id, ancestor_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_eligible(&self, user_id: &str, eligible: bool) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE ledger_user SET eligible = ?2 WHERE user_id = ?1",
            params![user_id, i32::from(eligible)],
        )?;
        Ok(())
    }

    /// Move the user's current position and stamp the promotion time.
    pub fn set_user_position(&self, user_id: &str, position: Position) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE ledger_user
             SET current_tier = ?2, current_level = ?3, promoted_at = ?4
             WHERE user_id = ?1",
            params![user_id, position.tier, position.level, to_millis(self.now)],
        )?;
        Ok(())
    }

    /// Add to total and balance earnings. Returns the new balance.
    pub fn credit_earnings(&self, user_id: &str, amount: Cents) -> LedgerResult<Cents> {
        let balance: Cents = self.tx.query_row(
            "UPDATE ledger_user
             SET total_earnings = total_earnings + ?2,
                 balance_earnings = balance_earnings + ?2
             WHERE user_id = ?1
             RETURNING balance_earnings",
            params![user_id, amount],
            |r| r.get(0),
        )?;
        Ok(balance)
    }

    /// Move `amount` from balance to withdrawn, only if the balance covers
    /// it. Returns the new balance, or None if it does not.
    pub fn debit_balance(&self, user_id: &str, amount: Cents) -> LedgerResult<Option<Cents>> {
        let balance = self
            .tx
            .query_row(
                "UPDATE ledger_user
                 SET balance_earnings = balance_earnings - ?2,
                     withdrawn_earnings = withdrawn_earnings + ?2
                 WHERE user_id = ?1 AND balance_earnings >= ?2
                 RETURNING balance_earnings",
                params![user_id, amount],
                |r| r.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    /// Number of registered users (for summaries).
    pub fn user_count(&self) -> LedgerResult<i64> {
        let n: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM ledger_user", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Users ordered by current position, highest first (for summaries).
    pub fn top_users(&self, limit: u32) -> LedgerResult<Vec<UserRecord>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM ledger_user
             ORDER BY current_tier DESC, current_level DESC, total_earnings DESC, user_id ASC
             LIMIT ?1"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], map_user)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
