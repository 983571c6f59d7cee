//! Ledger events: everything the collaborators outside the core react to.
//!
//! RULE: Events are written to `event_log` inside the transaction that
//! produced them, and handed to observers only after that transaction
//! commits. Observers never run inside a transaction boundary.

use crate::types::{Cents, Side, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ReferralPlaced {
        ancestor_id:   UserId,
        descendant_id: UserId,
        side:          Side,
        tier:          u32,
        level:         u32,
    },
    PlacementCompleted {
        ancestor_id:   UserId,
        descendant_id: UserId,
        side:          Side,
        tier:          u32,
        level:         u32,
    },
    Promoted {
        user_id:   UserId,
        new_level: u32,
        new_tier:  u32,
    },
    EarningsAccrued {
        ancestor_id:   UserId,
        descendant_id: UserId,
        level:         u32,
        amount:        Cents,
        new_balance:   Cents,
    },
    EarningsWithdrawn {
        user_id:     UserId,
        amount:      Cents,
        new_balance: Cents,
    },
}

impl LedgerEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ReferralPlaced { .. }     => "referral_placed",
            Self::PlacementCompleted { .. } => "placement_completed",
            Self::Promoted { .. }           => "promoted",
            Self::EarningsAccrued { .. }    => "earnings_accrued",
            Self::EarningsWithdrawn { .. }  => "earnings_withdrawn",
        }
    }

    /// The user whose ledger state the event describes.
    pub fn subject(&self) -> &str {
        match self {
            Self::ReferralPlaced { ancestor_id, .. }
            | Self::PlacementCompleted { ancestor_id, .. }
            | Self::EarningsAccrued { ancestor_id, .. } => ancestor_id,
            Self::Promoted { user_id, .. } | Self::EarningsWithdrawn { user_id, .. } => user_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         i64,
    pub event_type: String,
    pub user_id:    UserId,
    pub payload:    String, // JSON-serialized LedgerEvent
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}

/// Notification hooks for collaborators (email, push, reporting).
///
/// All methods default to doing nothing; implement the ones you need.
pub trait LedgerObserver: Send + Sync {
    fn on_promoted(&self, _user_id: &str, _new_level: u32, _new_tier: u32) {}

    fn on_earnings_accrued(&self, _ancestor_id: &str, _amount: Cents, _new_balance: Cents) {}

    /// Called for every event, including the two above.
    fn on_event(&self, _event: &LedgerEvent) {}
}

/// Deliver one committed event to an observer.
pub(crate) fn dispatch(observer: &dyn LedgerObserver, event: &LedgerEvent) {
    match event {
        LedgerEvent::Promoted { user_id, new_level, new_tier } => {
            observer.on_promoted(user_id, *new_level, *new_tier);
        }
        LedgerEvent::EarningsAccrued { ancestor_id, amount, new_balance, .. } => {
            observer.on_earnings_accrued(ancestor_id, *amount, *new_balance);
        }
        _ => {}
    }
    observer.on_event(event);
}

/// Collects every dispatched event. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<LedgerEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn promotions(&self) -> Vec<(UserId, u32, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LedgerEvent::Promoted { user_id, new_level, new_tier } => {
                    Some((user_id, new_level, new_tier))
                }
                _ => None,
            })
            .collect()
    }
}

impl LedgerObserver for RecordingObserver {
    fn on_event(&self, event: &LedgerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Events produced inside one write transaction, already persisted to
/// `event_log` and waiting for the commit before dispatch.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<LedgerEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, tx: &crate::store::LedgerTx<'_>, event: LedgerEvent) -> crate::error::LedgerResult<()> {
        tx.append_event(&event)?;
        self.events.push(event);
        Ok(())
    }

    pub fn into_events(self) -> Vec<LedgerEvent> {
        self.events
    }
}
