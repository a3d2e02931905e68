//! Sequence reordering with gap detection
//!
//! UDP delivery is unordered; the decode pipeline must see every chunk
//! exactly once, in sequence order, with no regressions. The engine
//! buffers arrivals keyed by 16-bit sequence number (wraparound-aware),
//! emits contiguous runs, and tracks every missing sequence as a gap
//! with two deadlines: after `retransmit_timeout` the gap is reported
//! missing (exactly once) so the session can request a resend; after
//! `gap_max_wait` the gap is abandoned and emission resumes, so a
//! permanently lost packet cannot stall playback forever.
//!
//! The engine is a synchronous state machine. The session owns the
//! clock: it passes `Instant`s into [`ReorderEngine::add`] and drives
//! [`ReorderEngine::poll`] from its timer tick, which keeps this module
//! deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::rtp::seq_distance;

/// Re-sync rather than open a gap run longer than this. Jumps this large
/// mean the sender restarted its sequence space, not packet loss.
const MAX_GAP_RUN: u16 = 1000;

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderState {
    /// No packets seen since creation or reset
    Idle,
    /// Emitting contiguous output
    Streaming,
    /// One or more gaps open, emission blocked at the first gap
    GapWait,
}

/// Events produced by the engine, in the order they must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderEvent {
    /// The payload for this sequence is next in order: emit it now
    Emit(u16),
    /// This sequence's gap timer expired; request a retransmission.
    /// Fired at most once per gap.
    Missing(u16),
    /// This gap exceeded the maximum wait and was dropped; emission
    /// resumes after it
    Skipped(u16),
}

/// Outcome of inserting one sequence
#[derive(Debug)]
pub enum AddResult {
    /// Sequence accepted; handle the events (the inserted sequence is
    /// now tracked by the engine, so its payload must be retained)
    Accepted(Vec<ReorderEvent>),
    /// Sequence is already buffered; drop the new payload
    Duplicate,
    /// Sequence is behind the emission point (already emitted or
    /// skipped); drop the payload
    Stale,
    /// Sequence jumped beyond the reorder window; all buffered state
    /// was discarded and the stream restarted at this sequence
    Resync(Vec<ReorderEvent>),
}

#[derive(Debug)]
struct Gap {
    opened_at: Instant,
    reported: bool,
}

/// The per-session reorder engine
#[derive(Debug)]
pub struct ReorderEngine {
    /// Arrival times of buffered, not-yet-emitted sequences
    pending: HashMap<u16, Instant>,
    /// Open gaps keyed by missing sequence
    gaps: HashMap<u16, Gap>,
    /// Next sequence to emit; `None` until the first packet
    next_seq: Option<u16>,
    state: ReorderState,
    retransmit_timeout: Duration,
    gap_max_wait: Duration,
}

impl ReorderEngine {
    /// Create an engine with the given gap deadlines
    #[must_use]
    pub fn new(retransmit_timeout: Duration, gap_max_wait: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            gaps: HashMap::new(),
            next_seq: None,
            state: ReorderState::Idle,
            retransmit_timeout,
            gap_max_wait,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ReorderState {
        self.state
    }

    /// Number of buffered sequences awaiting emission
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of open gaps
    #[must_use]
    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    /// Insert a sequence that arrived at `now`
    pub fn add(&mut self, seq: u16, now: Instant) -> AddResult {
        let Some(next) = self.next_seq else {
            // First packet establishes the stream position
            self.next_seq = Some(seq.wrapping_add(1));
            self.state = ReorderState::Streaming;
            return AddResult::Accepted(vec![ReorderEvent::Emit(seq)]);
        };

        let dist = seq_distance(next, seq);

        if dist >= 0x8000 {
            // Behind the emission point. A bounded distance back is a
            // late or duplicate packet; anything further means the
            // sender restarted its sequence space.
            if seq_distance(seq, next) <= MAX_GAP_RUN {
                return AddResult::Stale;
            }
            return self.resync(seq);
        }

        if self.pending.contains_key(&seq) {
            return AddResult::Duplicate;
        }

        if dist == 0 {
            // The immediate successor: emit it and any now-contiguous run
            self.gaps.remove(&seq);
            let mut events = vec![ReorderEvent::Emit(seq)];
            self.next_seq = Some(seq.wrapping_add(1));
            self.drain(&mut events);
            self.update_state();
            return AddResult::Accepted(events);
        }

        if self.gaps.remove(&seq).is_some() {
            // A missing sequence arrived before (or after) its timer;
            // removal cancels the timer. Emission stays blocked until
            // the run back to `next` is contiguous.
            self.pending.insert(seq, now);
            self.update_state();
            return AddResult::Accepted(Vec::new());
        }

        if dist > MAX_GAP_RUN {
            return self.resync(seq);
        }

        // Ahead of the expected next: every sequence in between that is
        // neither buffered nor already tracked becomes a gap
        let mut missing = next;
        while missing != seq {
            if !self.pending.contains_key(&missing) && !self.gaps.contains_key(&missing) {
                self.gaps.insert(
                    missing,
                    Gap {
                        opened_at: now,
                        reported: false,
                    },
                );
            }
            missing = missing.wrapping_add(1);
        }

        self.pending.insert(seq, now);
        self.state = ReorderState::GapWait;
        AddResult::Accepted(Vec::new())
    }

    /// Advance gap timers to `now`
    ///
    /// Reports expired gaps as [`ReorderEvent::Missing`] (once each) and
    /// force-skips head gaps older than the maximum wait, resuming
    /// emission from the next contiguous run.
    pub fn poll(&mut self, now: Instant) -> Vec<ReorderEvent> {
        let mut events = Vec::new();

        if let Some(next) = self.next_seq {
            let mut due: Vec<u16> = self
                .gaps
                .iter()
                .filter(|(_, gap)| {
                    !gap.reported && now.duration_since(gap.opened_at) >= self.retransmit_timeout
                })
                .map(|(&seq, _)| seq)
                .collect();
            due.sort_unstable_by_key(|&seq| seq_distance(next, seq));

            for seq in due {
                if let Some(gap) = self.gaps.get_mut(&seq) {
                    gap.reported = true;
                    events.push(ReorderEvent::Missing(seq));
                }
            }
        }

        // Skip expired head gaps; each skip may unblock a contiguous run
        // whose tail is another expired gap, so loop.
        while let Some(next) = self.next_seq {
            let expired = self
                .gaps
                .get(&next)
                .is_some_and(|gap| now.duration_since(gap.opened_at) >= self.gap_max_wait);

            if !expired {
                break;
            }

            self.gaps.remove(&next);
            tracing::warn!(seq = next, "gap never filled, skipping");
            events.push(ReorderEvent::Skipped(next));
            self.next_seq = Some(next.wrapping_add(1));
            self.drain(&mut events);
        }

        self.update_state();
        events
    }

    /// Discard all buffered and pending state and return to idle
    ///
    /// The engine instance survives TEARDOWN/re-RECORD cycles; armed gap
    /// timers never fire after a reset.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.gaps.clear();
        self.next_seq = None;
        self.state = ReorderState::Idle;
    }

    fn resync(&mut self, seq: u16) -> AddResult {
        tracing::warn!(seq, "sequence jump beyond reorder window, resyncing");
        self.pending.clear();
        self.gaps.clear();
        self.next_seq = Some(seq.wrapping_add(1));
        self.state = ReorderState::Streaming;
        AddResult::Resync(vec![ReorderEvent::Emit(seq)])
    }

    fn drain(&mut self, events: &mut Vec<ReorderEvent>) {
        while let Some(next) = self.next_seq {
            if self.pending.remove(&next).is_none() {
                break;
            }
            events.push(ReorderEvent::Emit(next));
            self.next_seq = Some(next.wrapping_add(1));
        }
    }

    fn update_state(&mut self) {
        if self.next_seq.is_none() {
            self.state = ReorderState::Idle;
        } else if self.gaps.is_empty() {
            self.state = ReorderState::Streaming;
        } else {
            self.state = ReorderState::GapWait;
        }
    }
}
