//! Completion tests: exactly-once counting under redelivery.

use referral_core::{
    eligibility::EligibleSet,
    engine::ReferralEngine,
    types::{EdgeStatus, Position},
};
use std::sync::Arc;

fn build() -> ReferralEngine {
    ReferralEngine::build_test().expect("build test engine")
}

fn place(engine: &mut ReferralEngine, ancestor: &str, child: &str) {
    engine.register_user(child, Some(ancestor)).unwrap();
    engine.on_placement_requested(ancestor, child).unwrap();
}

#[test]
fn replayed_completion_counts_once() {
    let mut engine = build();
    engine.register_user("a", None).unwrap();
    place(&mut engine, "a", "b");

    let first = engine.mark_eligible("b").unwrap();
    assert!(first.completed);
    for _ in 0..5 {
        let replay = engine.mark_eligible("b").unwrap();
        assert!(!replay.completed, "replay must not complete again");
    }

    let counter = engine.level_counter("a", Position::START).unwrap().unwrap();
    assert_eq!(counter.left_count, 1);
    assert_eq!(counter.right_count, 0);

    let edge = engine.edge("a", "b").unwrap().unwrap();
    assert_eq!(edge.status, EdgeStatus::Finished);
    assert!(edge.finished_at.is_some());
    assert!(engine.user("b").unwrap().unwrap().eligible);
}

#[test]
fn completion_without_edge_is_a_no_op() {
    let mut engine = build();
    engine.register_user("loner", None).unwrap();

    let settlement = engine.mark_eligible("loner").unwrap();
    assert!(!settlement.completed);
    assert!(settlement.promotions.is_empty());
    // The flag still follows the subscription.
    assert!(engine.user("loner").unwrap().unwrap().eligible);

    let settlement = engine.mark_eligible("nobody").unwrap();
    assert!(!settlement.completed);
}

#[test]
fn registered_but_unplaced_user_does_not_count() {
    let mut engine = build();
    engine.register_user("a", None).unwrap();
    engine.register_user("b", Some("a")).unwrap();

    let settlement = engine.mark_eligible("b").unwrap();
    assert!(!settlement.completed);
    assert!(engine.level_counter("a", Position::START).unwrap().is_none());

    // Placement afterwards still leaves the edge pending until the next
    // eligibility event arrives.
    engine.on_placement_requested("a", "b").unwrap();
    assert!(engine.mark_eligible("b").unwrap().completed);
}

#[test]
fn eligibility_source_gates_completion() {
    let eligible = EligibleSet::new();
    let mut engine = ReferralEngine::build_test_with(Arc::new(eligible.clone())).unwrap();
    engine.register_user("a", None).unwrap();
    place(&mut engine, "a", "b");

    let settlement = engine.on_eligibility_changed("b").unwrap();
    assert!(!settlement.completed);
    assert_eq!(engine.edge("a", "b").unwrap().unwrap().status, EdgeStatus::Pending);

    eligible.grant("b");
    assert!(engine.on_eligibility_changed("b").unwrap().completed);

    // Losing eligibility clears the flag but never un-finishes the edge.
    eligible.revoke("b");
    engine.on_eligibility_changed("b").unwrap();
    assert!(!engine.user("b").unwrap().unwrap().eligible);
    assert_eq!(engine.edge("a", "b").unwrap().unwrap().status, EdgeStatus::Finished);
    let counter = engine.level_counter("a", Position::START).unwrap().unwrap();
    assert_eq!(counter.left_count, 1);
}
