//! Tests for suggestion reconciliation after place edits.

use dwelldetect::{
    DetectionEngine, DetectionStore, LocationPoint, MemoryStore, Place, VisitFilter, VisitStatus,
};

const BASE: i64 = 1_700_000_000;

fn minute(m: i64) -> i64 {
    BASE + m * 60
}

/// A dwell at (0,0) for 30 minutes with departure proof, and a second dwell
/// at ~1.1km north between minutes 60 and 90, also with departure proof.
fn two_dwell_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    for i in 0..=15 {
        store.add_point(LocationPoint::new(0.0, 0.0, minute(i * 2)));
    }
    store.add_point(LocationPoint::new(1.41, 0.0, minute(45)));
    for i in 0..=15 {
        store.add_point(LocationPoint::new(0.01, 0.0, minute(60 + i * 2)));
    }
    store.add_point(LocationPoint::new(1.41, 0.0, minute(120)));
    store
}

#[test]
fn test_place_move_swaps_suggestions() {
    let mut store = two_dwell_store();
    store.add_place(Place::new(1, "Spot", 0.0, 0.0, 50.0));

    let mut engine = DetectionEngine::new(store);
    assert_eq!(engine.detect_visits_for_place(1, None).unwrap(), 1);

    // The user drags the place onto the second dwell.
    engine
        .store_mut()
        .add_place(Place::new(1, "Spot", 0.01, 0.0, 50.0));

    let stats = engine.reconcile_visits_for_place(1).unwrap();
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.added, 1);

    let visits = engine
        .store()
        .find_visits(&VisitFilter::default().place(1))
        .unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].arrival_at, minute(60));
    assert_eq!(visits[0].departure_at, minute(90));
}

#[test]
fn test_reconcile_keeps_still_valid_suggestion() {
    let mut store = two_dwell_store();
    store.add_place(Place::new(1, "Spot", 0.0, 0.0, 50.0));

    let mut engine = DetectionEngine::new(store);
    assert_eq!(engine.detect_visits_for_place(1, None).unwrap(), 1);
    let before = engine
        .store()
        .find_visits(&VisitFilter::default().place(1))
        .unwrap();

    // A radius tweak that still covers the dwell changes nothing.
    engine
        .store_mut()
        .add_place(Place::new(1, "Spot", 0.0, 0.0, 80.0));
    let stats = engine.reconcile_visits_for_place(1).unwrap();
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.added, 0);

    let after = engine
        .store()
        .find_visits(&VisitFilter::default().place(1))
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_reconcile_never_touches_confirmed() {
    let mut store = two_dwell_store();
    store.add_place(Place::new(1, "Spot", 0.0, 0.0, 50.0));

    let mut engine = DetectionEngine::new(store);
    engine.detect_visits_for_place(1, None).unwrap();

    // The user confirms the visit, then moves the place away.
    let visit_id = engine
        .store()
        .find_visits(&VisitFilter::default().place(1))
        .unwrap()[0]
        .id;
    engine
        .store_mut()
        .update_visit_status(visit_id, VisitStatus::Confirmed)
        .unwrap();
    engine
        .store_mut()
        .add_place(Place::new(1, "Spot", 0.01, 0.0, 50.0));

    let stats = engine.reconcile_visits_for_place(1).unwrap();
    assert_eq!(stats.removed, 0);
    // The second dwell's candidate is still created.
    assert_eq!(stats.added, 1);

    let confirmed = engine.store().visit(visit_id).unwrap();
    assert_eq!(confirmed.status, VisitStatus::Confirmed);
    assert_eq!(confirmed.arrival_at, minute(0));
}

#[test]
fn test_reconcile_deactivated_place_clears_suggestions() {
    let mut store = two_dwell_store();
    store.add_place(Place::new(1, "Spot", 0.0, 0.0, 50.0));

    let mut engine = DetectionEngine::new(store);
    assert_eq!(engine.detect_visits_for_place(1, None).unwrap(), 1);

    let mut place = Place::new(1, "Spot", 0.0, 0.0, 50.0);
    place.active = false;
    engine.store_mut().add_place(place);

    let stats = engine.reconcile_visits_for_place(1).unwrap();
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.added, 0);
    assert_eq!(engine.store().visit_count(), 0);
}

#[test]
fn test_reconcile_missing_place_is_a_noop() {
    let mut engine = DetectionEngine::new(two_dwell_store());
    let stats = engine.reconcile_visits_for_place(42).unwrap();
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.added, 0);
}
