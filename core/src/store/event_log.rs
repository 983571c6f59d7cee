//! Store methods for the ledger event outbox.

use super::{time_column, LedgerTx};
use crate::{
    clock::to_millis,
    error::LedgerResult,
    event::{EventLogEntry, LedgerEvent},
};
use rusqlite::params;

impl LedgerTx<'_> {
    pub fn append_event(&self, event: &LedgerEvent) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO event_log (event_type, user_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.type_name(),
                event.subject(),
                serde_json::to_string(event)?,
                to_millis(self.now),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_user(&self, user_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, event_type, user_id, payload, created_at
             FROM event_log WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(EventLogEntry {
                    id:         row.get(0)?,
                    event_type: row.get(1)?,
                    user_id:    row.get(2)?,
                    payload:    row.get(3)?,
                    created_at: time_column(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> LedgerResult<i64> {
        let n: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}
