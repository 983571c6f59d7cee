//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call `LedgerTx` methods and never execute SQL directly.
//!
//! Every mutation runs inside `LedgerStore::write`, which opens a
//! `BEGIN IMMEDIATE` transaction, hands the closure a `LedgerTx`, and
//! commits. The immediate write lock is what serializes writers across
//! connections. The `version` check on level counters is a guard on top
//! of it and only fires if a counter changes underneath a read, which
//! the lock already rules out.
//!
//! A conflict (version mismatch, SQLITE_BUSY/LOCKED) rolls the whole
//! transaction back and the closure is replayed from scratch, so closures
//! must derive everything from what they read through the transaction.

mod counter;
mod earnings;
mod edge;
mod event_log;
mod user;

use crate::{
    clock::{from_millis, LedgerClock},
    config::EngineConfig,
    error::{LedgerError, LedgerResult},
    types::{Cents, EdgeStatus, Position, Side, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct LedgerStore {
    conn:         Connection,
    path:         Option<String>, // None for :memory:, Some(path) for file
    clock:        Arc<dyn LedgerClock>,
    config:       EngineConfig,
}

impl LedgerStore {
    pub fn open(path: &str, config: &EngineConfig, clock: Arc<dyn LedgerClock>) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Self::configure(&conn, config)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            clock,
            config: config.clone(),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory(config: &EngineConfig, clock: Arc<dyn LedgerClock>) -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, config)?;
        Ok(Self {
            conn,
            path: None,
            clock,
            config: config.clone(),
        })
    }

    fn configure(conn: &Connection, config: &EngineConfig) -> LedgerResult<()> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(config.store.busy_timeout_ms))?;
        Ok(())
    }

    /// Open a second connection to the same database, one per worker.
    /// For in-memory databases this returns a new, isolated database.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p, &self.config, Arc::clone(&self.clock)),
            None => Self::in_memory(&self.config, Arc::clone(&self.clock)),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_earnings.sql"))?;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` inside an immediate write transaction, retrying on conflict.
    ///
    /// `operation` only labels log lines and the exhaustion error.
    pub fn write<T, F>(&mut self, operation: &str, mut f: F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.try_write(&mut f) {
                Err(err) if err.is_retryable() => {
                    log::debug!("{operation}: attempt {attempt}/{max_attempts} conflicted: {err}");
                }
                outcome => return outcome,
            }
        }
        log::warn!("{operation}: giving up after {max_attempts} conflicting attempts");
        Err(LedgerError::ConcurrencyExhausted {
            operation: operation.to_string(),
            attempts:  max_attempts,
        })
    }

    fn try_write<T, F>(&mut self, f: &mut F) -> LedgerResult<T>
    where
        F: FnMut(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ledger_tx = LedgerTx { tx, now };
        // Dropping the transaction on error rolls it back.
        let value = f(&ledger_tx)?;
        ledger_tx.tx.commit()?;
        Ok(value)
    }

    /// Run read-only queries against one consistent snapshot.
    pub fn read<T, F>(&mut self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> LedgerResult<T>,
    {
        let now = self.clock.now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let ledger_tx = LedgerTx { tx, now };
        let value = f(&ledger_tx)?;
        ledger_tx.tx.commit()?;
        Ok(value)
    }
}

/// An open ledger transaction and the instant it was started.
pub struct LedgerTx<'conn> {
    tx:  Transaction<'conn>,
    now: DateTime<Utc>,
}

impl LedgerTx<'_> {
    /// Timestamp shared by every row this transaction writes.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

// ── Rows ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id:            UserId,
    pub ancestor_id:        Option<UserId>,
    pub position:           Position,
    pub total_earnings:     Cents,
    pub withdrawn_earnings: Cents,
    pub balance_earnings:   Cents,
    pub eligible:           bool,
    pub promoted_at:        Option<DateTime<Utc>>,
    pub created_at:         DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounter {
    pub ancestor_id: UserId,
    pub position:    Position,
    pub left_count:  u32,
    pub right_count: u32,
    pub threshold:   u32,
    pub version:     i64,
    pub promoted_at: Option<DateTime<Utc>>,
    pub created_at:  DateTime<Utc>,
}

impl LevelCounter {
    pub fn count(&self, side: Side) -> u32 {
        match side {
            Side::Left  => self.left_count,
            Side::Right => self.right_count,
        }
    }

    /// Both sides independently reached the threshold.
    pub fn clears_threshold(&self) -> bool {
        self.left_count >= self.threshold && self.right_count >= self.threshold
    }

    pub fn is_promoted(&self) -> bool {
        self.promoted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub seq:           i64,
    pub ancestor_id:   UserId,
    pub descendant_id: UserId,
    pub side:          Side,
    pub position:      Position,
    pub status:        EdgeStatus,
    pub created_at:    DateTime<Utc>,
    pub finished_at:   Option<DateTime<Utc>>,
}

impl ReferralEdge {
    pub fn is_finished(&self) -> bool {
        self.status == EdgeStatus::Finished
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsRecord {
    pub ancestor_id:   UserId,
    pub descendant_id: UserId,
    pub level:         u32,
    pub amount:        Cents,
    pub created_at:    DateTime<Utc>,
}

// ── Column helpers ─────────────────────────────────────────────────

fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn time_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = r.get(idx)?;
    from_millis(millis).ok_or_else(|| out_of_range(idx, millis))
}

fn opt_time_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = r.get(idx)?;
    millis
        .map(|m| from_millis(m).ok_or_else(|| out_of_range(idx, m)))
        .transpose()
}

fn out_of_range(idx: usize, millis: i64) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Integer,
        format!("timestamp {millis}ms is out of range").into(),
    )
}
