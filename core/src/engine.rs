//! The referral engine: intake, settlement and read APIs.
//!
//! FLOW:
//!   placement requested -> PlacementEngine                      (1 txn)
//!   eligibility changed -> CompletionTracker                    (1 txn)
//!                       -> PromotionEngine, one level per txn, walking
//!                          up the ancestor chain through a work queue
//!
//! RULES:
//!   - Every transaction commits before the next one in a chain starts.
//!   - Observers are called only after the transaction that produced
//!     their events has committed.
//!   - Every intake operation is safe to redeliver.

use crate::{
    clock::{LedgerClock, SteppingClock},
    command::LedgerCommand,
    completion::CompletionTracker,
    config::EngineConfig,
    earnings::{AccrualOutcome, EarningsLedger, EarningsSummary},
    eligibility::{AlwaysEligible, EligibilitySource},
    error::{LedgerError, LedgerResult},
    event::{dispatch, EventLogEntry, LedgerEvent, LedgerObserver, Outbox},
    placement::{PlacementEngine, PlacementOutcome},
    promotion::{Promotion, PromotionEngine, PromotionResult},
    snapshot::TreeSnapshot,
    store::{EarningsRecord, LedgerStore, LevelCounter, ReferralEdge, UserRecord},
    types::{Cents, Position, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// What one eligibility event settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// An edge flipped to finished during this call.
    pub completed:  bool,
    pub promotions: Vec<Promotion>,
}

pub struct ReferralEngine {
    config:      EngineConfig,
    store:       LedgerStore,
    eligibility: Arc<dyn EligibilitySource>,
    observers:   Vec<Arc<dyn LedgerObserver>>,
}

impl ReferralEngine {
    /// Wrap an already-migrated store.
    pub fn new(store: LedgerStore, eligibility: Arc<dyn EligibilitySource>) -> Self {
        Self {
            config: store.config().clone(),
            store,
            eligibility,
            observers: Vec::new(),
        }
    }

    /// Open (or create) a ledger database at `path` and migrate it.
    pub fn open(
        path:        &str,
        config:      &EngineConfig,
        clock:       Arc<dyn LedgerClock>,
        eligibility: Arc<dyn EligibilitySource>,
    ) -> LedgerResult<Self> {
        let store = LedgerStore::open(path, config, clock)?;
        store.migrate()?;
        Ok(Self::new(store, eligibility))
    }

    /// In-memory ledger with the test config, a stepping clock and every
    /// user eligible.
    pub fn build_test() -> LedgerResult<Self> {
        Self::build_test_with(Arc::new(AlwaysEligible))
    }

    pub fn build_test_with(eligibility: Arc<dyn EligibilitySource>) -> LedgerResult<Self> {
        let config = EngineConfig::default_test();
        let store = LedgerStore::in_memory(&config, Arc::new(SteppingClock::from_epoch()))?;
        store.migrate()?;
        Ok(Self::new(store, eligibility))
    }

    /// A second engine on its own connection to the same database,
    /// sharing eligibility source and observers. One per worker thread.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Ok(Self {
            config:      self.config.clone(),
            store:       self.store.reopen()?,
            eligibility: Arc::clone(&self.eligibility),
            observers:   self.observers.clone(),
        })
    }

    pub fn add_observer(&mut self, observer: Arc<dyn LedgerObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Intake ─────────────────────────────────────────────────

    /// Create a user summary. Returns false if the user already existed.
    pub fn register_user(&mut self, user_id: &str, ancestor_id: Option<&str>) -> LedgerResult<bool> {
        if ancestor_id == Some(user_id) {
            return Err(LedgerError::SelfReferral { user_id: user_id.to_string() });
        }
        self.store.write("register_user", |tx| {
            if let Some(ancestor) = ancestor_id {
                if tx.user(ancestor)?.is_none() {
                    return Err(LedgerError::UnknownAncestor { user_id: ancestor.to_string() });
                }
            }
            tx.insert_user(user_id, ancestor_id)
        })
    }

    /// Place `descendant_id` under `ancestor_id`. Redelivery returns the
    /// original edge as `AlreadyPlaced`.
    pub fn on_placement_requested(
        &mut self,
        ancestor_id:   &str,
        descendant_id: &str,
    ) -> LedgerResult<PlacementOutcome> {
        let result = self.store.write("place_referral", |tx| {
            let mut outbox = Outbox::new();
            let outcome = PlacementEngine.place_referral(tx, ancestor_id, descendant_id, &mut outbox)?;
            Ok((outcome, outbox.into_events()))
        });
        let (outcome, events) = self.reject_logged("place_referral", result)?;
        self.dispatch(&events);
        Ok(outcome)
    }

    /// Consult the eligibility source and complete the user's placement
    /// if it says yes. A user turning ineligible only clears the flag;
    /// finished placements are never reversed.
    pub fn on_eligibility_changed(&mut self, user_id: &str) -> LedgerResult<Settlement> {
        if self.eligibility.is_eligible(user_id)? {
            return self.mark_eligible(user_id);
        }
        self.store.write("clear_eligible", |tx| tx.set_eligible(user_id, false))?;
        Ok(Settlement::default())
    }

    /// Complete the user's placement and settle every promotion it causes.
    pub fn mark_eligible(&mut self, user_id: &str) -> LedgerResult<Settlement> {
        let (completion, events) = self.store.write("mark_eligible", |tx| {
            let mut outbox = Outbox::new();
            let outcome = CompletionTracker.mark_eligible(tx, user_id, &mut outbox)?;
            Ok((outcome, outbox.into_events()))
        })?;
        self.dispatch(&events);

        let mut settlement = Settlement::default();
        if let Some(done) = completion {
            settlement.completed = done.newly_finished;
            let queue = VecDeque::from([(done.ancestor_id, done.position)]);
            self.settle(queue, &mut settlement.promotions)?;
        }
        Ok(settlement)
    }

    /// Evaluate one counter and settle any cascade it starts. Returns the
    /// outcome for that counter alone.
    pub fn evaluate(&mut self, user_id: &str, position: Position) -> LedgerResult<PromotionResult> {
        let mut promotions = Vec::new();
        let first = VecDeque::from([(user_id.to_string(), position)]);
        let result = self.settle(first, &mut promotions)?;
        Ok(result.unwrap_or(PromotionResult::NOT_PROMOTED))
    }

    /// Drain the work queue, one committed transaction per item.
    fn settle(
        &mut self,
        mut queue:  VecDeque<(UserId, Position)>,
        promotions: &mut Vec<Promotion>,
    ) -> LedgerResult<Option<PromotionResult>> {
        let mut first_result = None;
        while let Some((user_id, position)) = queue.pop_front() {
            let payout = &self.config.payout;
            let (step, events) = self.store.write("evaluate_promotion", |tx| {
                let mut outbox = Outbox::new();
                let step = PromotionEngine::new(payout).evaluate(tx, &user_id, position, &mut outbox)?;
                Ok((step, outbox.into_events()))
            })?;
            self.dispatch(&events);

            if let Some(to) = step.result.next {
                promotions.push(Promotion { user_id: user_id.clone(), from: position, to });
            }
            first_result.get_or_insert(step.result);
            queue.extend(step.follow_ups);
        }
        Ok(first_result)
    }

    /// Record an accrual directly. Idempotent per (ancestor, descendant, level).
    pub fn accrue(
        &mut self,
        ancestor_id:   &str,
        descendant_id: &str,
        level:         u32,
        amount:        Cents,
    ) -> LedgerResult<AccrualOutcome> {
        let (outcome, events) = self.store.write("accrue", |tx| {
            let mut outbox = Outbox::new();
            let outcome =
                EarningsLedger.accrue(tx, ancestor_id, descendant_id, level, amount, &mut outbox)?;
            Ok((outcome, outbox.into_events()))
        })?;
        self.dispatch(&events);
        Ok(outcome)
    }

    /// Move part of the balance to withdrawn. Returns the new balance.
    pub fn withdraw(&mut self, user_id: &str, amount: Cents) -> LedgerResult<Cents> {
        let (balance, events) = self.store.write("withdraw", |tx| {
            let mut outbox = Outbox::new();
            let balance = EarningsLedger.withdraw(tx, user_id, amount, &mut outbox)?;
            Ok((balance, outbox.into_events()))
        })?;
        self.dispatch(&events);
        Ok(balance)
    }

    /// Apply one replayed intake command.
    pub fn apply(&mut self, command: &LedgerCommand) -> LedgerResult<()> {
        match command {
            LedgerCommand::Register { user_id, ancestor_id } => {
                self.register_user(user_id, ancestor_id.as_deref())?;
            }
            LedgerCommand::Place { ancestor_id, descendant_id } => {
                self.on_placement_requested(ancestor_id, descendant_id)?;
            }
            LedgerCommand::Eligible { user_id } => {
                self.mark_eligible(user_id)?;
            }
            LedgerCommand::Withdraw { user_id, amount } => {
                self.withdraw(user_id, *amount)?;
            }
        }
        Ok(())
    }

    fn dispatch(&self, events: &[LedgerEvent]) {
        for event in events {
            for observer in &self.observers {
                dispatch(observer.as_ref(), event);
            }
        }
    }

    fn reject_logged<T>(&self, operation: &str, result: LedgerResult<T>) -> LedgerResult<T> {
        if let Err(err) = &result {
            if err.is_permanent() {
                log::warn!("{operation} rejected: {err}");
            }
        }
        result
    }

    // ── Read APIs ──────────────────────────────────────────────

    pub fn get_tree(&mut self, user_id: &str) -> LedgerResult<TreeSnapshot> {
        self.store.read(|tx| TreeSnapshot::capture(tx, user_id))
    }

    pub fn get_earnings_summary(&mut self, user_id: &str) -> LedgerResult<EarningsSummary> {
        self.store.read(|tx| EarningsLedger.summary(tx, user_id))
    }

    pub fn user(&mut self, user_id: &str) -> LedgerResult<Option<UserRecord>> {
        self.store.read(|tx| tx.user(user_id))
    }

    pub fn level_counter(&mut self, user_id: &str, position: Position) -> LedgerResult<Option<LevelCounter>> {
        self.store.read(|tx| tx.level_counter(user_id, position))
    }

    pub fn edge(&mut self, ancestor_id: &str, descendant_id: &str) -> LedgerResult<Option<ReferralEdge>> {
        self.store.read(|tx| tx.edge(ancestor_id, descendant_id))
    }

    pub fn earnings_for(&mut self, ancestor_id: &str) -> LedgerResult<Vec<EarningsRecord>> {
        self.store.read(|tx| tx.earnings_for(ancestor_id))
    }

    pub fn events_for_user(&mut self, user_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        self.store.read(|tx| tx.events_for_user(user_id))
    }

    /// Raw store access for tooling and tests.
    pub fn store_mut(&mut self) -> &mut LedgerStore {
        &mut self.store
    }
}
