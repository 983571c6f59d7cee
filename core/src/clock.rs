//! Ledger clock: the single source of timestamps.
//!
//! RULE: Nothing in the ledger reads the wall clock directly.
//! Each write transaction captures one `now()` and stamps every row it
//! creates or promotes with it.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Mutex;

pub trait LedgerClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, for production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LedgerClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: every call returns a strictly later
/// instant than the one before.
#[derive(Debug)]
pub struct SteppingClock {
    next: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self { next: Mutex::new(start), step }
    }

    /// Starts at the Unix epoch and steps one millisecond per call.
    pub fn from_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH, Duration::milliseconds(1))
    }
}

impl LedgerClock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = *next;
        *next = now + self.step;
        now
    }
}

/// Millisecond storage representation.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// None when `millis` is outside chrono's representable range.
pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_and_reject_out_of_range() {
        let at = SteppingClock::from_epoch().now() + Duration::days(400);
        assert_eq!(from_millis(to_millis(at)), Some(at));
        assert_eq!(from_millis(i64::MAX), None);
    }

    #[test]
    fn stepping_clock_is_strictly_increasing() {
        let clock = SteppingClock::from_epoch();
        let first = clock.now();
        assert_eq!(first, DateTime::<Utc>::UNIX_EPOCH);
        assert!(clock.now() > first);
    }
}
