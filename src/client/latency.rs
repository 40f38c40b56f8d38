//! Ping bookkeeping and the round-trip window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bounded FIFO of round-trip samples with a running sum.
#[derive(Debug, Clone)]
pub struct RttWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    sum: Duration,
}

impl RttWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity, sum: Duration::ZERO }
    }

    /// Push a sample, evicting the oldest once full.
    pub fn push(&mut self, rtt: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(rtt);
        self.sum += rtt;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Oldest first.
    pub fn samples(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().copied()
    }

    /// Half the mean round trip, in seconds; `None` until the window is full.
    pub fn one_way_latency(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.sum.as_secs_f64() / self.samples.len() as f64 / 2.0)
    }
}

/// Unanswered pings kept before the oldest is forgotten.
pub const MAX_IN_FLIGHT: usize = 64;

/// Issues ping IDs and matches replies.
#[derive(Debug)]
pub struct LatencyTracker {
    next_id: u32,
    pending: Option<u32>,
    /// Oldest first.
    in_flight: VecDeque<(u32, Instant)>,
    window: RttWindow,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        Self { next_id: 0, pending: None, in_flight: VecDeque::new(), window: RttWindow::new(window) }
    }

    /// Allocate the next ping ID and mark it for the next outbound batch.
    pub fn request_ping(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1);
        self.pending = Some(self.next_id);
        self.next_id
    }

    /// Take the ping waiting to be sent, if any.
    pub fn take_pending(&mut self) -> Option<u32> {
        self.pending.take()
    }

    /// Record that `id` went out at `sent_at`, forgetting the oldest unanswered ping
    /// past [`MAX_IN_FLIGHT`].
    pub fn mark_sent(&mut self, id: u32, sent_at: Instant) {
        if self.in_flight.len() == MAX_IN_FLIGHT {
            if let Some((lost, _)) = self.in_flight.pop_front() {
                debug!(id = lost, "Ping never answered");
            }
        }
        self.in_flight.push_back((id, sent_at));
    }

    /// Match a reply; unknown IDs are ignored.
    pub fn reply(&mut self, id: u32, received_at: Instant) -> Option<Duration> {
        let Some(position) = self.in_flight.iter().position(|&(sent, _)| sent == id) else {
            debug!(id, "Unmatched ping reply");
            return None;
        };
        let (_, sent_at) = self.in_flight.remove(position)?;
        let rtt = received_at.saturating_duration_since(sent_at);
        self.window.push(rtt);
        Some(rtt)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// One-way network latency in seconds, once enough samples exist.
    pub fn network_latency(&self) -> Option<f64> {
        self.window.one_way_latency()
    }

    pub fn window(&self) -> &RttWindow {
        &self.window
    }
}
