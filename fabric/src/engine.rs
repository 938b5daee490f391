// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Discrete-event queue.
//!
//! The engine is single-threaded and cooperative: every handler runs to
//! completion before the next event is popped, so the entities it drives
//! never observe concurrent mutation. Events with equal timestamps fire in
//! scheduling order (a monotonically increasing sequence number breaks
//! ties).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use petgraph::prelude::*;

use crate::packet::Packet;
use crate::SimTime;

/// Default floor for near-zero positive delays. Without it, a compute
/// deadline landing a rounding error after `now` would re-trigger the same
/// update in an unbounded storm of zero-width ticks.
pub const MIN_EVENT_QUANTUM: SimTime = 0.01;

/// Closed set of event payloads exchanged between fabric entities.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// Wake a physical node: deliver arrived packets, advance its
    /// schedulers, dispatch produced packets.
    UpdateProcessing,
    /// A packet arriving at a switch from a host or another switch.
    PacketToSwitch(Packet),
    /// A packet arriving at its destination host.
    PacketToHost(Packet),
    /// Debounced flush of a switch's pending queues. Carries the
    /// generation token current when it was scheduled; a stale token is
    /// ignored by the switch.
    SwitchFlush { token: u64 },
}

/// A not-yet-scheduled event, produced by an entity while the driver holds
/// it borrowed. The driver converts these into [EventQueue::schedule_at]
/// calls once the borrow ends.
#[derive(Debug)]
pub struct Dispatch {
    pub delay: SimTime,
    pub target: NodeIndex,
    pub kind: EventKind,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub time: SimTime,
    pub target: NodeIndex,
    pub kind: EventKind,
    seq: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so the BinaryHeap pops the earliest event; equal timestamps
    // resolve to the lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct EventQueue {
    heap: BinaryHeap<Event>,
    now: SimTime,
    next_seq: u64,
    min_quantum: SimTime,
}

impl EventQueue {
    pub fn new(min_quantum: SimTime) -> Self {
        assert!(min_quantum > 0.0);
        Self {
            heap: BinaryHeap::new(),
            now: 0.0,
            next_seq: 0,
            min_quantum,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn min_quantum(&self) -> SimTime {
        self.min_quantum
    }

    /// Schedule `kind` for `target` after `delay`.
    ///
    /// A zero delay is permitted (same-tick cascades, e.g. local packet
    /// delivery); positive delays smaller than the quantum are floored to
    /// it.
    pub fn schedule_at(&mut self, target: NodeIndex, delay: SimTime, kind: EventKind) {
        debug_assert!(delay >= 0.0, "negative delay {}", delay);
        let delay = if delay > 0.0 && delay < self.min_quantum {
            self.min_quantum
        } else {
            delay
        };
        let event = Event {
            time: self.now + delay,
            target,
            kind,
            seq: self.next_seq,
        };
        log::trace!(
            "schedule t={:.6} target={} {:?}",
            event.time,
            target.index(),
            event.kind
        );
        self.next_seq += 1;
        self.heap.push(event);
    }

    /// Remove every not-yet-fired event for `target` whose payload matches
    /// `predicate`. Returns the number of events removed.
    pub fn cancel_matching<F>(&mut self, target: NodeIndex, predicate: F) -> usize
    where
        F: Fn(&EventKind) -> bool,
    {
        let before = self.heap.len();
        let retained = self
            .heap
            .drain()
            .filter(|event| event.target != target || !predicate(&event.kind))
            .collect::<Vec<_>>();
        self.heap = BinaryHeap::from(retained);
        before - self.heap.len()
    }

    /// Pop the earliest event and advance the clock to it.
    pub fn pop(&mut self) -> Option<Event> {
        let event = self.heap.pop()?;
        debug_assert!(event.time >= self.now);
        self.now = event.time;
        Some(event)
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|event| event.time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
