//! Placement tests: validation, idempotency, side balance.

use referral_core::{
    engine::ReferralEngine,
    error::LedgerError,
    types::{EdgeStatus, Position, Side},
};

fn build() -> ReferralEngine {
    ReferralEngine::build_test().expect("build test engine")
}

fn register(engine: &mut ReferralEngine, user: &str, ancestor: Option<&str>) {
    engine.register_user(user, ancestor).expect("register user");
}

#[test]
fn second_placement_returns_the_first_edge() {
    let mut engine = build();
    register(&mut engine, "a", None);
    register(&mut engine, "b", Some("a"));

    let first = engine.on_placement_requested("a", "b").unwrap();
    let second = engine.on_placement_requested("a", "b").unwrap();

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(first.edge(), second.edge());

    let tree = engine.get_tree("a").unwrap();
    let members: usize = tree.levels.iter().map(|l| l.left.len() + l.right.len()).sum();
    assert_eq!(members, 1, "exactly one edge should exist");
}

#[test]
fn new_edge_is_pending_at_start_position() {
    let mut engine = build();
    register(&mut engine, "a", None);
    register(&mut engine, "b", None);

    let edge = engine.on_placement_requested("a", "b").unwrap().edge().clone();
    assert_eq!(edge.status, EdgeStatus::Pending);
    assert_eq!(edge.position, Position::START);
    assert_eq!(edge.side, Side::Left);

    // Placement records the referring ancestor when none was registered.
    let b = engine.user("b").unwrap().unwrap();
    assert_eq!(b.ancestor_id.as_deref(), Some("a"));

    // The counter exists, but placement never counts.
    let counter = engine.level_counter("a", Position::START).unwrap().unwrap();
    assert_eq!((counter.left_count, counter.right_count), (0, 0));
    assert_eq!(counter.threshold, 2);
}

#[test]
fn sides_alternate_with_ties_going_left() {
    let mut engine = build();
    register(&mut engine, "a", None);
    let mut sides = Vec::new();
    for child in ["b", "c", "d", "e", "f"] {
        register(&mut engine, child, Some("a"));
        sides.push(engine.on_placement_requested("a", child).unwrap().edge().side);
    }
    assert_eq!(
        sides,
        vec![Side::Left, Side::Right, Side::Left, Side::Right, Side::Left]
    );
}

#[test]
fn self_referral_is_rejected() {
    let mut engine = build();
    register(&mut engine, "a", None);
    let err = engine.on_placement_requested("a", "a").unwrap_err();
    assert!(matches!(err, LedgerError::SelfReferral { .. }), "got {err:?}");
    assert!(err.is_permanent());
}

#[test]
fn unknown_users_are_rejected() {
    let mut engine = build();
    register(&mut engine, "a", None);

    let err = engine.on_placement_requested("ghost", "a").unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAncestor { .. }), "got {err:?}");

    let err = engine.on_placement_requested("a", "ghost").unwrap_err();
    assert!(matches!(err, LedgerError::UnknownDescendant { .. }), "got {err:?}");
}

#[test]
fn descendant_cannot_move_to_a_second_ancestor() {
    let mut engine = build();
    register(&mut engine, "a", None);
    register(&mut engine, "x", None);
    register(&mut engine, "b", Some("a"));
    engine.on_placement_requested("a", "b").unwrap();

    let err = engine.on_placement_requested("x", "b").unwrap_err();
    match err {
        LedgerError::AlreadyReferred { existing_ancestor, .. } => assert_eq!(existing_ancestor, "a"),
        other => panic!("expected AlreadyReferred, got {other:?}"),
    }
}

#[test]
fn placing_an_ancestor_under_its_descendant_is_a_cycle() {
    let mut engine = build();
    register(&mut engine, "a", None);
    register(&mut engine, "b", None);
    register(&mut engine, "c", None);
    engine.on_placement_requested("a", "b").unwrap();
    engine.on_placement_requested("b", "c").unwrap();

    let err = engine.on_placement_requested("c", "a").unwrap_err();
    assert!(matches!(err, LedgerError::ReferralCycle { .. }), "got {err:?}");
    assert!(engine.user("a").unwrap().unwrap().ancestor_id.is_none());
}

#[test]
fn registration_rejects_unknown_ancestor_and_is_idempotent() {
    let mut engine = build();
    assert!(engine.register_user("a", None).unwrap());
    assert!(!engine.register_user("a", None).unwrap());

    let err = engine.register_user("b", Some("ghost")).unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAncestor { .. }), "got {err:?}");
}
