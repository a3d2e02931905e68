//! Retransmission request scheduling
//!
//! Resend requests go out over the control channel, but never as a
//! burst: senders process roughly 25 requests per second and silently
//! drop the rest, so dispatches are spaced by a throttle interval and
//! capped at a concurrency limit. A sequence with a request already
//! pending is coalesced rather than re-dispatched.
//!
//! Like the reorder engine, this is a synchronous decision core; the
//! session's driver does the actual socket send and feeds send/response
//! outcomes back in. Suspension (waiting for a throttle slot) therefore
//! lives in the driver, the only place this transport legitimately
//! waits.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// State of one tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Queued,
    InFlight,
}

#[derive(Debug)]
struct Pending {
    state: RequestState,
    epoch: u64,
}

/// Rate- and concurrency-limited retransmission scheduler
#[derive(Debug)]
pub struct RetransmitScheduler {
    /// Sequences awaiting dispatch, FIFO
    queue: VecDeque<u16>,
    /// Every tracked sequence (queued or in flight); doubles as the
    /// pending-response mapping
    pending: HashMap<u16, Pending>,
    in_flight: usize,
    limit: usize,
    throttle: Duration,
    last_dispatch: Option<Instant>,
    epoch: u64,
    requests_sent: u64,
}

impl RetransmitScheduler {
    /// Create a scheduler with the given concurrency limit and minimum
    /// inter-dispatch spacing
    #[must_use]
    pub fn new(limit: usize, throttle: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            pending: HashMap::new(),
            in_flight: 0,
            limit,
            throttle,
            last_dispatch: None,
            epoch: 0,
            requests_sent: 0,
        }
    }

    /// Enqueue a retransmission request for `seq`
    ///
    /// Returns `false` when a request for this sequence is already
    /// pending; the duplicate is coalesced, not re-dispatched.
    pub fn request(&mut self, seq: u16) -> bool {
        if self.pending.contains_key(&seq) {
            return false;
        }

        self.pending.insert(
            seq,
            Pending {
                state: RequestState::Queued,
                epoch: self.epoch,
            },
        );
        self.queue.push_back(seq);
        true
    }

    /// When the next dispatch may happen, if anything is dispatchable
    ///
    /// `None` means the queue is empty or the concurrency limit is
    /// reached; a new request or a completed response re-arms it.
    #[must_use]
    pub fn next_dispatch_at(&self, now: Instant) -> Option<Instant> {
        if self.queue.is_empty() || self.in_flight >= self.limit {
            return None;
        }

        Some(match self.last_dispatch {
            Some(last) => now.max(last + self.throttle),
            None => now,
        })
    }

    /// Take the next sequence to dispatch, if a slot is free and the
    /// throttle interval has elapsed
    pub fn poll_dispatch(&mut self, now: Instant) -> Option<u16> {
        if self.in_flight >= self.limit {
            return None;
        }
        if let Some(last) = self.last_dispatch {
            if now.duration_since(last) < self.throttle {
                return None;
            }
        }

        let seq = self.queue.pop_front()?;
        if let Some(pending) = self.pending.get_mut(&seq) {
            pending.state = RequestState::InFlight;
        }
        self.in_flight += 1;
        self.last_dispatch = Some(now);
        Some(seq)
    }

    /// The dispatch for `seq` was flushed to the transport
    pub fn mark_sent(&mut self, seq: u16) {
        self.requests_sent += 1;
        tracing::debug!(seq, total = self.requests_sent, "retransmit request sent");
    }

    /// Requests successfully flushed over the session's lifetime
    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    /// The dispatch for `seq` failed to send. The slot is freed and the
    /// request dropped; the scheduler never auto-retries a failed send
    /// (the reorder engine's gap policy decides whether to give up).
    pub fn fail(&mut self, seq: u16) {
        if self.pending.remove(&seq).is_some() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    /// Match an inbound response to its outstanding request
    ///
    /// Returns `true` when `seq` had an in-flight request from the
    /// current epoch; the request is then removed from the pending
    /// mapping. Late responses from a previous epoch return `false` and
    /// must be ignored by the caller.
    pub fn complete(&mut self, seq: u16) -> bool {
        match self.pending.get(&seq) {
            Some(pending) if pending.epoch == self.epoch => {
                let was_in_flight = pending.state == RequestState::InFlight;
                self.pending.remove(&seq);
                if was_in_flight {
                    self.in_flight = self.in_flight.saturating_sub(1);
                } else {
                    // Response raced the dispatch; drop the queued entry
                    self.queue.retain(|&s| s != seq);
                }
                true
            }
            _ => false,
        }
    }

    /// Abandon all queued and in-flight requests and start a new epoch
    ///
    /// Responses to requests from the old epoch will no longer match.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.in_flight = 0;
        self.last_dispatch = None;
        self.epoch += 1;
    }

    /// Current epoch (bumped by every reset)
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Requests currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Tracked requests (queued plus in flight)
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
