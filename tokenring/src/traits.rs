//! The seam between the protocol and whatever drives it.
//!
//! Nodes never own a clock or a queue. They ask a [`Scheduler`] to wake them
//! later or to carry an envelope to a neighbor, which lets the same state
//! machine run under the discrete event simulator or a mock in unit tests.

use crate::time::Timestamp;
use crate::types::{Envelope, NodeId};

/// Opaque handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

/// Event delivery contract required by [`Node`](crate::node::Node).
///
/// Implementations must:
/// - process events in non-decreasing time order, breaking ties by insertion
///   order;
/// - keep each edge FIFO (an envelope handed over earlier on the same edge is
///   delivered no later than one handed over afterwards);
/// - never hand a timer or envelope to a node the ring reports as withdrawn.
pub trait Scheduler {
    /// Wake `node` at or after `at`.
    fn schedule(&mut self, node: NodeId, at: Timestamp) -> TimerHandle;

    /// Carry `envelope` to `target`, arriving at or after `at`.
    ///
    /// The edge is `envelope.last_forwarder() -> target`.
    fn deliver(&mut self, envelope: Envelope, target: NodeId, at: Timestamp);
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock scheduler for unit testing node transitions.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use super::*;

    /// Scheduler that records every request instead of acting on it.
    #[derive(Debug, Default)]
    pub struct RecordingScheduler {
        next_handle: u64,
        /// Timers requested, in order.
        pub timers: Vec<(NodeId, Timestamp)>,
        /// Deliveries requested, in order.
        pub deliveries: Vec<(Envelope, NodeId, Timestamp)>,
    }

    impl RecordingScheduler {
        pub fn new() -> Self {
            Self::default()
        }

        /// Take the recorded deliveries, leaving the list empty.
        pub fn take_deliveries(&mut self) -> Vec<(Envelope, NodeId, Timestamp)> {
            core::mem::take(&mut self.deliveries)
        }

        /// Take the recorded timers, leaving the list empty.
        pub fn take_timers(&mut self) -> Vec<(NodeId, Timestamp)> {
            core::mem::take(&mut self.timers)
        }
    }

    impl Scheduler for RecordingScheduler {
        fn schedule(&mut self, node: NodeId, at: Timestamp) -> TimerHandle {
            let handle = TimerHandle(self.next_handle);
            self.next_handle += 1;
            self.timers.push((node, at));
            handle
        }

        fn deliver(&mut self, envelope: Envelope, target: NodeId, at: Timestamp) {
            self.deliveries.push((envelope, target, at));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_impls::RecordingScheduler;
    use super::*;

    #[test]
    fn test_recording_scheduler() {
        let mut sched = RecordingScheduler::new();
        let h1 = sched.schedule(NodeId(1), Timestamp::from_secs(1));
        let h2 = sched.schedule(NodeId(1), Timestamp::from_secs(2));
        assert_ne!(h1, h2);

        sched.deliver(
            Envelope::create(NodeId(1), NodeId(2), 0),
            NodeId(2),
            Timestamp::ZERO,
        );
        assert_eq!(sched.take_timers().len(), 2);
        assert_eq!(sched.take_deliveries().len(), 1);
        assert!(sched.deliveries.is_empty());
    }
}
