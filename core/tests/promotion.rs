//! Promotion tests: both-sides threshold, overflow carry-over, cascades.

use referral_core::{
    completion::CompletionTracker,
    engine::ReferralEngine,
    error::LedgerError,
    event::{Outbox, RecordingObserver},
    promotion::PromotionEngine,
    threshold::threshold,
    types::{Position, Side},
};
use std::sync::Arc;

fn build() -> (ReferralEngine, RecordingObserver) {
    let mut engine = ReferralEngine::build_test().expect("build test engine");
    let recorder = RecordingObserver::new();
    engine.add_observer(Arc::new(recorder.clone()));
    (engine, recorder)
}

fn place(engine: &mut ReferralEngine, ancestor: &str, child: &str) -> Side {
    engine.register_user(child, Some(ancestor)).unwrap();
    engine.on_placement_requested(ancestor, child).unwrap().edge().side
}

fn counts(engine: &mut ReferralEngine, user: &str, position: Position) -> (u32, u32) {
    let c = engine.level_counter(user, position).unwrap().expect("counter exists");
    (c.left_count, c.right_count)
}

/// Four placements under A; promotion only fires on the fourth completion.
#[test]
fn promotion_requires_both_sides() {
    let (mut engine, recorder) = build();
    engine.register_user("a", None).unwrap();
    for child in ["b", "c", "d", "e"] {
        place(&mut engine, "a", child);
    }

    engine.mark_eligible("b").unwrap();
    engine.mark_eligible("c").unwrap();
    assert_eq!(counts(&mut engine, "a", Position::START), (1, 1));

    let settlement = engine.mark_eligible("d").unwrap();
    assert_eq!(counts(&mut engine, "a", Position::START), (2, 1));
    assert!(settlement.promotions.is_empty(), "one full side must not promote");
    assert!(recorder.promotions().is_empty());

    let settlement = engine.mark_eligible("e").unwrap();
    assert_eq!(settlement.promotions.len(), 1);
    assert_eq!(settlement.promotions[0].to, Position::new(1, 2));
    assert_eq!(recorder.promotions(), vec![("a".to_string(), 2, 1)]);

    // Exact threshold match: nothing carried.
    assert_eq!(counts(&mut engine, "a", Position::START), (2, 2));
    assert_eq!(counts(&mut engine, "a", Position::new(1, 2)), (0, 0));

    let a = engine.user("a").unwrap().unwrap();
    assert_eq!(a.position, Position::new(1, 2));
    assert!(a.promoted_at.is_some());

    let next = engine.level_counter("a", Position::new(1, 2)).unwrap().unwrap();
    assert_eq!(next.threshold, threshold(2));
}

#[test]
fn overflow_carries_newest_edges_and_conserves_counts() {
    let (mut engine, _) = build();
    engine.register_user("a", None).unwrap();
    let children = ["b1", "b2", "b3", "b4", "b5", "b6"];
    for child in children {
        place(&mut engine, "a", child);
    }

    // Left side fills to 3 before the right reaches 2.
    for child in ["b1", "b3", "b5", "b2"] {
        engine.mark_eligible(child).unwrap();
    }
    assert_eq!(counts(&mut engine, "a", Position::START), (3, 1));

    let settlement = engine.mark_eligible("b4").unwrap();
    assert_eq!(settlement.promotions.len(), 1);

    let old = counts(&mut engine, "a", Position::START);
    let new = counts(&mut engine, "a", Position::new(1, 2));
    assert_eq!(old, (2, 2));
    assert_eq!(new, (1, 0));
    assert_eq!(old.0 + new.0, 3, "left placements conserved across the move");

    // The most recent finished left edge is the one carried.
    let moved = engine.edge("a", "b5").unwrap().unwrap();
    assert_eq!(moved.position, Position::new(1, 2));
    for stayed in ["b1", "b3"] {
        assert_eq!(engine.edge("a", stayed).unwrap().unwrap().position, Position::START);
    }
}

#[test]
fn late_completion_is_credited_to_the_current_level() {
    let (mut engine, _) = build();
    engine.register_user("a", None).unwrap();
    for child in ["b1", "b2", "b3", "b4", "b5", "b6"] {
        place(&mut engine, "a", child);
    }
    for child in ["b1", "b2", "b3", "b4"] {
        engine.mark_eligible(child).unwrap();
    }
    assert_eq!(engine.user("a").unwrap().unwrap().position, Position::new(1, 2));

    // b6 was placed at level 1 and only finishes now.
    engine.mark_eligible("b6").unwrap();
    assert_eq!(counts(&mut engine, "a", Position::START), (2, 2));
    assert_eq!(counts(&mut engine, "a", Position::new(1, 2)), (0, 1));
    assert_eq!(engine.edge("a", "b6").unwrap().unwrap().position, Position::new(1, 2));
}

#[test]
fn new_placements_land_on_the_promoted_level() {
    let (mut engine, _) = build();
    engine.register_user("a", None).unwrap();
    for child in ["b", "c", "d", "e"] {
        place(&mut engine, "a", child);
        engine.mark_eligible(child).unwrap();
    }
    place(&mut engine, "a", "f");
    let edge = engine.edge("a", "f").unwrap().unwrap();
    assert_eq!(edge.position, Position::new(1, 2));
    assert_eq!(edge.side, Side::Left);
}

#[test]
fn re_evaluating_a_promoted_level_is_a_no_op() {
    let (mut engine, recorder) = build();
    engine.register_user("a", None).unwrap();
    for child in ["b", "c", "d", "e"] {
        place(&mut engine, "a", child);
        engine.mark_eligible(child).unwrap();
    }
    let records = engine.earnings_for("a").unwrap().len();

    for _ in 0..3 {
        let result = engine.evaluate("a", Position::START).unwrap();
        assert!(!result.promoted);
        assert_eq!(result.next_level(), None);
    }
    assert_eq!(recorder.promotions().len(), 1);
    assert_eq!(engine.earnings_for("a").unwrap().len(), records);
    assert_eq!(engine.user("a").unwrap().unwrap().position, Position::new(1, 2));
}

#[test]
fn evaluating_a_missing_counter_does_nothing() {
    let (mut engine, _) = build();
    engine.register_user("a", None).unwrap();
    let result = engine.evaluate("a", Position::new(1, 5)).unwrap();
    assert!(!result.promoted);
    assert!(engine.level_counter("a", Position::new(1, 5)).unwrap().is_none());
}

/// A promotes without ever subscribing; that finishes A's own edge under
/// R and completes R's level 1 in the same settlement.
#[test]
fn promotion_cascades_to_the_parent() {
    let (mut engine, recorder) = build();
    engine.register_user("r", None).unwrap();
    assert_eq!(place(&mut engine, "r", "a"), Side::Left);
    assert_eq!(place(&mut engine, "r", "x"), Side::Right);
    assert_eq!(place(&mut engine, "r", "y"), Side::Left);
    assert_eq!(place(&mut engine, "r", "z"), Side::Right);
    for child in ["x", "y", "z"] {
        engine.mark_eligible(child).unwrap();
    }
    assert_eq!(counts(&mut engine, "r", Position::START), (1, 2));

    for grandchild in ["a1", "a2", "a3", "a4"] {
        place(&mut engine, "a", grandchild);
    }
    for grandchild in ["a1", "a2", "a3"] {
        engine.mark_eligible(grandchild).unwrap();
    }
    let settlement = engine.mark_eligible("a4").unwrap();

    let promoted: Vec<&str> = settlement.promotions.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(promoted, vec!["a", "r"]);
    assert_eq!(
        recorder.promotions(),
        vec![("a".to_string(), 2, 1), ("r".to_string(), 2, 1)]
    );

    let a = engine.user("a").unwrap().unwrap();
    assert!(!a.eligible, "cascading does not touch the subscription flag");
    assert!(engine.edge("r", "a").unwrap().unwrap().is_finished());
    assert_eq!(engine.user("r").unwrap().unwrap().position, Position::new(1, 2));
}

/// Finish a descendant's edge in its own transaction without settling.
fn finish_unsettled(engine: &mut ReferralEngine, descendant: &str) {
    engine
        .store_mut()
        .write("finish_unsettled", |tx| {
            CompletionTracker.mark_eligible(tx, descendant, &mut Outbox::new())
        })
        .unwrap()
        .expect("descendant has an edge");
}

/// The child's promotion commits but the parent's transaction never runs.
/// Redelivering the completion must still promote the parent.
#[test]
fn redelivery_completes_an_interrupted_cascade() {
    let (mut engine, recorder) = build();
    engine.register_user("r", None).unwrap();
    for child in ["a", "x", "y", "z"] {
        place(&mut engine, "r", child);
    }
    for child in ["x", "y", "z"] {
        engine.mark_eligible(child).unwrap();
    }
    for grandchild in ["a1", "a2", "a3", "a4"] {
        place(&mut engine, "a", grandchild);
    }
    for grandchild in ["a1", "a2", "a3"] {
        engine.mark_eligible(grandchild).unwrap();
    }

    finish_unsettled(&mut engine, "a4");
    let payout = engine.config().payout.clone();
    let step = engine
        .store_mut()
        .write("evaluate_promotion", |tx| {
            PromotionEngine::new(&payout).evaluate(tx, "a", Position::START, &mut Outbox::new())
        })
        .unwrap();
    assert!(step.result.promoted);
    assert_eq!(counts(&mut engine, "r", Position::START), (2, 2));
    assert_eq!(engine.user("r").unwrap().unwrap().position, Position::START);

    let settlement = engine.mark_eligible("a4").unwrap();
    assert!(!settlement.completed);
    let promoted: Vec<&str> = settlement.promotions.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(promoted, vec!["r"]);
    assert_eq!(engine.user("r").unwrap().unwrap().position, Position::new(1, 2));
    assert_eq!(recorder.promotions(), vec![("r".to_string(), 2, 1)]);

    // Once settled, further redelivery finds nothing left to do.
    let settlement = engine.mark_eligible("a4").unwrap();
    assert!(settlement.promotions.is_empty());
}

/// The next level filled up without ever being evaluated. A completion
/// redelivered against the promoted level settles it.
#[test]
fn redelivery_settles_an_unevaluated_next_level() {
    let (mut engine, _recorder) = build();
    engine.register_user("a", None).unwrap();
    for child in ["b", "c", "d", "e"] {
        place(&mut engine, "a", child);
        engine.mark_eligible(child).unwrap();
    }
    let level_two = Position::new(1, 2);
    assert_eq!(engine.user("a").unwrap().unwrap().position, level_two);

    let late: Vec<String> = (0..8).map(|i| format!("n{i}")).collect();
    for child in &late {
        place(&mut engine, "a", child);
    }
    for child in &late {
        finish_unsettled(&mut engine, child);
    }
    assert_eq!(counts(&mut engine, "a", level_two), (4, 4));
    assert_eq!(engine.user("a").unwrap().unwrap().position, level_two);

    let settlement = engine.mark_eligible("b").unwrap();
    assert_eq!(settlement.promotions.len(), 1);
    assert_eq!(settlement.promotions[0].from, level_two);
    assert_eq!(engine.user("a").unwrap().unwrap().position, Position::new(1, 3));
}

#[test]
fn promotion_across_a_tier_boundary() {
    let (mut engine, recorder) = build();
    engine.register_user("a", None).unwrap();
    let top = Position::new(1, 10);
    let per_side = threshold(top.level);

    // Seed a level-10 counter directly: one extra finished edge on the left.
    engine
        .store_mut()
        .write("seed_level_ten", |tx| {
            let mut left = 0;
            let mut right = 0;
            for i in 0..(2 * per_side + 1) {
                let child = format!("c{i}");
                tx.insert_user(&child, Some("a"))?;
                let side = if i % 2 == 0 { Side::Left } else { Side::Right };
                tx.insert_edge("a", &child, side, top)?;
                tx.finish_edge("a", &child)?;
                match side {
                    Side::Left => left += 1,
                    Side::Right => right += 1,
                }
            }
            let counter = tx.ensure_counter("a", top)?;
            tx.update_counter(&counter, left, right, false)?;
            tx.set_user_position("a", top)?;
            Ok(())
        })
        .unwrap();

    let result = engine.evaluate("a", top).unwrap();
    assert!(result.promoted);
    assert_eq!(result.next, Some(Position::new(2, 1)));
    assert_eq!(recorder.promotions(), vec![("a".to_string(), 1, 2)]);

    let carried = engine.edge("a", &format!("c{}", 2 * per_side)).unwrap().unwrap();
    assert_eq!(carried.position, Position::new(2, 1), "tier is reassigned with the level");
    assert_eq!(counts(&mut engine, "a", Position::new(2, 1)), (1, 0));
    assert_eq!(counts(&mut engine, "a", top), (per_side, per_side));

    let a = engine.user("a").unwrap().unwrap();
    assert_eq!(a.position, Position::new(2, 1));
    let tier_two = engine.level_counter("a", Position::new(2, 1)).unwrap().unwrap();
    assert_eq!(tier_two.threshold, 2);
}

#[test]
fn corrupt_counter_refuses_the_write_and_rolls_back() {
    let (mut engine, recorder) = build();
    engine.register_user("a", None).unwrap();
    place(&mut engine, "a", "b");
    place(&mut engine, "a", "c");
    engine.mark_eligible("b").unwrap();
    engine.mark_eligible("c").unwrap();

    // Claim 2/2 while only one finished edge sits on each side.
    engine
        .store_mut()
        .write("corrupt", |tx| {
            let counter = tx.ensure_counter("a", Position::START)?;
            tx.update_counter(&counter, 2, 2, false)
        })
        .unwrap();

    let err = engine.evaluate("a", Position::START).unwrap_err();
    assert!(matches!(err, LedgerError::InvariantViolation { .. }), "got {err:?}");

    let counter = engine.level_counter("a", Position::START).unwrap().unwrap();
    assert!(!counter.is_promoted());
    assert!(engine.level_counter("a", Position::new(1, 2)).unwrap().is_none());
    assert_eq!(engine.user("a").unwrap().unwrap().position, Position::START);
    assert!(recorder.promotions().is_empty(), "nothing dispatched for a rolled-back step");
}
