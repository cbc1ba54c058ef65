use crate::clock::{ClockId, ClockRational};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    ClockEdge { clock: ClockId, rising: bool },
    ProcessWake { process: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SimEvent {
    pub time: ClockRational,
    pub seq: u64,
    pub kind: EventKind,
}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Earlier time wins (BinaryHeap is a max-heap); ties resolve in
        // insertion order for determinism.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered event queue of pending clock edges and process wake-ups.
pub(crate) struct Scheduler {
    pub(crate) time: ClockRational,
    queue: BinaryHeap<SimEvent>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            time: ClockRational::new(0, 1),
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn clear(&mut self) {
        self.time = ClockRational::new(0, 1);
        self.queue.clear();
        self.next_seq = 0;
    }

    pub fn push(&mut self, time: ClockRational, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(SimEvent { time, seq, kind });
    }

    pub fn next_event_time(&self) -> Option<ClockRational> {
        self.queue.peek().map(|event| event.time)
    }

    /// Pops every event scheduled at exactly `time`.
    pub fn pop_events_at(&mut self, time: ClockRational) -> Vec<SimEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.queue.peek() {
            if event.time == time {
                events.push(self.queue.pop().expect("peeked event exists"));
            } else {
                break;
            }
        }
        events
    }
}
