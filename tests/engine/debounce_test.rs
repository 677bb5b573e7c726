//! Tests for `src/engine/debounce.rs` — sliding-window rate gate.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use nodewatch::engine::debounce::DebounceGate;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
}

#[test]
fn opens_on_kth_match_inside_window() {
    let mut gate = DebounceGate::new(3, Duration::from_secs(60));
    assert!(!gate.observe(at(0)));
    assert!(!gate.observe(at(1)));
    assert!(gate.observe(at(2)));
}

#[test]
fn stays_closed_when_matches_are_spread_out() {
    let mut gate = DebounceGate::new(3, Duration::from_secs(10));
    assert!(!gate.observe(at(0)));
    assert!(!gate.observe(at(6)));
    assert!(!gate.observe(at(12)));
    assert!(!gate.observe(at(18)));
}

#[test]
fn window_slides_with_new_matches() {
    let mut gate = DebounceGate::new(2, Duration::from_secs(10));
    assert!(!gate.observe(at(0)));
    assert!(!gate.observe(at(20)));
    assert!(gate.observe(at(25)));
    assert!(!gate.observe(at(40)));
}

#[test]
fn match_exactly_at_window_edge_is_outside() {
    let mut gate = DebounceGate::new(2, Duration::from_secs(10));
    assert!(!gate.observe(at(0)));
    assert!(!gate.observe(at(10)));
}

#[test]
fn reset_restarts_warm_up() {
    let mut gate = DebounceGate::new(2, Duration::from_secs(60));
    assert!(!gate.observe(at(0)));
    assert!(gate.observe(at(1)));

    gate.reset();
    assert!(!gate.observe(at(2)));
    assert!(gate.observe(at(3)));
}

#[test]
fn huge_threshold_does_not_allocate_up_front() {
    let mut gate = DebounceGate::new(usize::MAX, Duration::from_secs(60));
    assert!(!gate.observe(at(0)));
    assert!(!gate.observe(at(1)));
}
