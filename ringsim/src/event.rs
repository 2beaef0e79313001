//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use tokenring::{Duration, Envelope, NodeId, Scheduler, TimerHandle, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Force a node out of the ring regardless of its budget.
    Withdraw { node: NodeId },
    /// Hand an envelope straight to a node, bypassing the ring.
    Inject { to: NodeId, envelope: Envelope },
    /// Change the latency applied to subsequent hand-offs.
    SetLinkDelay { delay: Duration },
    /// Take a ring snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Deliver an envelope to a node.
    Delivery { to: NodeId, envelope: Envelope },
    /// Fire timer for a node.
    TimerFire { node: NodeId },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

impl Event {
    /// The node this event is addressed to, if any.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            Event::Delivery { to, .. } => Some(*to),
            Event::TimerFire { node } => Some(*node),
            Event::ScenarioAction(_) => None,
        }
    }
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap: earlier time first, then lower sequence.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Pending events plus the per-edge bookkeeping that keeps hand-offs FIFO.
///
/// This is the simulator's side of the [`Scheduler`] contract. It never
/// consults the ring; filtering events for withdrawn nodes happens when they
/// are popped.
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    link_delay: Duration,
    /// Latest arrival time scheduled on each directed edge.
    edge_clock: HashMap<(NodeId, NodeId), Timestamp>,
}

impl EventQueue {
    pub fn new(link_delay: Duration) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            link_delay,
            edge_clock: HashMap::new(),
        }
    }

    /// Schedule an event.
    pub fn push(&mut self, time: Timestamp, event: Event) -> SequenceNumber {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.heap.push(ScheduledEvent::new(time, seq, event));
        seq
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&ScheduledEvent> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn link_delay(&self) -> Duration {
        self.link_delay
    }

    pub fn set_link_delay(&mut self, delay: Duration) {
        self.link_delay = delay;
    }
}

impl Scheduler for EventQueue {
    fn schedule(&mut self, node: NodeId, at: Timestamp) -> TimerHandle {
        let seq = self.push(at, Event::TimerFire { node });
        TimerHandle(seq.value())
    }

    fn deliver(&mut self, envelope: Envelope, target: NodeId, at: Timestamp) {
        let edge = (envelope.last_forwarder(), target);
        let mut arrival = at + self.link_delay;
        // A shorter delay must not overtake an earlier hand-off on this edge.
        if let Some(&last) = self.edge_clock.get(&edge) {
            arrival = arrival.max(last);
        }
        self.edge_clock.insert(edge, arrival);
        self.push(
            arrival,
            Event::Delivery {
                to: target,
                envelope,
            },
        );
    }
}
