use std::time::{Duration, Instant};

use proptest::prelude::*;

use super::reorder::{AddResult, ReorderEngine, ReorderEvent, ReorderState};
use crate::protocol::rtp::seq_distance;

const TIMEOUT: Duration = Duration::from_millis(100);
const MAX_WAIT: Duration = Duration::from_secs(1);

fn engine() -> ReorderEngine {
    ReorderEngine::new(TIMEOUT, MAX_WAIT)
}

fn emits(result: &AddResult) -> Vec<u16> {
    match result {
        AddResult::Accepted(events) | AddResult::Resync(events) => events
            .iter()
            .filter_map(|e| match e {
                ReorderEvent::Emit(seq) => Some(*seq),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[test]
fn in_order_arrivals_emit_immediately() {
    let mut engine = engine();
    let now = Instant::now();

    for seq in 100u16..105 {
        assert_eq!(emits(&engine.add(seq, now)), vec![seq]);
    }
    assert_eq!(engine.state(), ReorderState::Streaming);
}

#[test]
fn wraparound_sequences_are_contiguous() {
    let mut engine = engine();
    let now = Instant::now();

    let mut emitted = Vec::new();
    for seq in [65534u16, 65535, 0, 1] {
        emitted.extend(emits(&engine.add(seq, now)));
    }

    assert_eq!(emitted, vec![65534, 65535, 0, 1]);
    assert_eq!(engine.gap_count(), 0);
}

#[test]
fn gap_reported_missing_exactly_once_each() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(100, t0);
    engine.add(103, t0);
    assert_eq!(engine.state(), ReorderState::GapWait);
    assert_eq!(engine.gap_count(), 2);

    // Before the timeout nothing fires
    assert!(engine.poll(t0 + TIMEOUT / 2).is_empty());

    let events = engine.poll(t0 + TIMEOUT);
    assert_eq!(
        events,
        vec![ReorderEvent::Missing(101), ReorderEvent::Missing(102)]
    );

    // Never reported a second time
    assert!(engine.poll(t0 + TIMEOUT * 2).is_empty());
}

#[test]
fn arrivals_before_expiry_cancel_the_timer() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(100, t0);
    engine.add(103, t0);

    let mut emitted = Vec::new();
    emitted.extend(emits(&engine.add(101, t0 + Duration::from_millis(10))));
    emitted.extend(emits(&engine.add(102, t0 + Duration::from_millis(20))));

    // 101 unblocked 101..=103; no missing signal ever fires
    assert_eq!(emitted, vec![101, 102, 103]);
    assert!(engine.poll(t0 + TIMEOUT * 2).is_empty());
    assert_eq!(engine.state(), ReorderState::Streaming);
}

#[test]
fn late_fill_cascades_contiguous_emission() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(10, t0);
    engine.add(12, t0);
    engine.add(13, t0);

    let result = engine.add(11, t0 + Duration::from_millis(5));
    assert_eq!(emits(&result), vec![11, 12, 13]);
}

#[test]
fn unfilled_gap_is_skipped_exactly_once() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(100, t0);
    engine.add(102, t0);

    let events = engine.poll(t0 + MAX_WAIT);
    assert_eq!(
        events,
        vec![
            ReorderEvent::Missing(101),
            ReorderEvent::Skipped(101),
            ReorderEvent::Emit(102),
        ]
    );

    // The skip happened exactly once; a later poll is quiet
    assert!(engine.poll(t0 + MAX_WAIT * 2).is_empty());
    assert_eq!(engine.state(), ReorderState::Streaming);
}

#[test]
fn consecutive_expired_gaps_all_skip() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(1, t0);
    engine.add(5, t0);

    let events = engine.poll(t0 + MAX_WAIT);
    let skipped: Vec<u16> = events
        .iter()
        .filter_map(|e| match e {
            ReorderEvent::Skipped(seq) => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![2, 3, 4]);
    assert!(events.contains(&ReorderEvent::Emit(5)));
}

#[test]
fn duplicates_are_dropped_not_double_buffered() {
    let mut engine = engine();
    let now = Instant::now();

    engine.add(100, now);
    engine.add(102, now);
    assert!(matches!(engine.add(102, now), AddResult::Duplicate));
    assert_eq!(engine.buffered_len(), 1);

    // Duplicate of an already-emitted sequence is stale
    assert!(matches!(engine.add(100, now), AddResult::Stale));
}

#[test]
fn stale_sequence_after_skip_is_rejected() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(100, t0);
    engine.add(102, t0);
    engine.poll(t0 + MAX_WAIT); // skips 101

    assert!(matches!(engine.add(101, t0 + MAX_WAIT), AddResult::Stale));
}

#[test]
fn reset_disarms_pending_gap_timers() {
    let mut engine = engine();
    let t0 = Instant::now();

    engine.add(100, t0);
    engine.add(105, t0);
    engine.reset();

    assert_eq!(engine.state(), ReorderState::Idle);
    assert!(engine.poll(t0 + MAX_WAIT * 4).is_empty());

    // A new epoch starts cleanly from any sequence
    assert_eq!(emits(&engine.add(7000, t0 + MAX_WAIT * 4)), vec![7000]);
}

#[test]
fn sequence_jump_beyond_window_resyncs() {
    let mut engine = engine();
    let now = Instant::now();

    engine.add(100, now);
    let result = engine.add(40_000, now);

    assert!(matches!(result, AddResult::Resync(_)));
    assert_eq!(emits(&result), vec![40_000]);
    assert_eq!(engine.gap_count(), 0);

    // Streaming resumes from the new position
    assert_eq!(emits(&engine.add(40_001, now)), vec![40_001]);
}

#[test]
fn restart_jumps_resync_in_both_halves_of_sequence_space() {
    let now = Instant::now();

    // New sequence lands ahead of the window
    let mut engine = engine();
    engine.add(100, now);
    assert!(matches!(engine.add(5_000, now), AddResult::Resync(_)));

    // New sequence lands in the behind half-space
    let mut engine = self::engine();
    engine.add(100, now);
    let result = engine.add(50_000, now);
    assert!(matches!(result, AddResult::Resync(_)));
    assert_eq!(emits(&result), vec![50_000]);

    // A bounded distance behind is still a late packet, not a restart
    let mut engine = self::engine();
    engine.add(100, now);
    assert!(matches!(engine.add(95, now), AddResult::Stale));
}

proptest! {
    /// Whatever the interleaving (out-of-order, duplicates, eventual
    /// expiry), emitted sequences are strictly increasing modulo
    /// wraparound with no duplicates.
    #[test]
    fn emission_is_strictly_ordered(order in proptest::collection::vec(0u16..60, 1..80)) {
        let mut engine = ReorderEngine::new(TIMEOUT, MAX_WAIT);
        let t0 = Instant::now();

        let base = 65500u16; // force a wraparound mid-stream

        let mut emitted = Vec::new();
        for (i, offset) in order.iter().enumerate() {
            let seq = base.wrapping_add(*offset);
            let at = t0 + Duration::from_millis(i as u64);
            emitted.extend(emits(&engine.add(seq, at)));
        }

        // Flush every unfilled gap
        for event in engine.poll(t0 + Duration::from_secs(120)) {
            if let ReorderEvent::Emit(seq) = event {
                emitted.push(seq);
            }
        }

        for pair in emitted.windows(2) {
            let dist = seq_distance(pair[0], pair[1]);
            prop_assert!(dist > 0 && dist < 0x8000, "regression: {} then {}", pair[0], pair[1]);
        }
    }
}
