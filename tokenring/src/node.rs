//! Per-node protocol state machine.
//!
//! A [`Node`] owns its budget and role and nothing else. Neighbors are looked
//! up in the [`RingTopology`] at the moment an envelope leaves, and all
//! waiting is expressed as a timer request to the [`Scheduler`]. Each handler
//! runs to completion and applies at most one transition.
//!
//! Every budget-consuming path follows the same order: decrement, hand the
//! envelope to the current successor, then withdraw if the budget reached
//! zero while other nodes remain. Handing off first means the envelope leaves
//! on the edge that existed when it was sent.

use tracing::{debug, error, info, warn};

use crate::config::{NodeSpec, RingConfig};
use crate::error::{ProtocolViolation, RingError, RingResult};
use crate::ring::{Relink, RingTopology};
use crate::time::{Duration, Timestamp};
use crate::traits::Scheduler;
use crate::types::{Envelope, NodeId};

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Live with no timer outstanding.
    Idle,
    /// Live with at least one timer outstanding.
    AwaitingNextTrigger,
    /// Spliced out of the ring. Terminal.
    Withdrawn,
}

/// Which transition a handler applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Created a new envelope (see [`Outcome::discarded`] for whether it left).
    Originated,
    /// Acknowledged an envelope addressed to this node and passed it on.
    Acknowledged,
    /// Spent budget to pass on someone else's envelope.
    Relayed,
    /// Consumed the acknowledgment of its own envelope.
    RoundTripComplete,
    /// Interpreted an envelope locally because no ring is left to forward on.
    ConsumedLocally,
    /// Dropped an envelope without acting on it.
    Dropped,
    /// The event did not apply to this node's current state.
    Ignored,
}

/// Why an envelope was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// No live successor at hand-off time.
    DisconnectedRoute,
    /// Relay with no budget left.
    ExhaustedRelay,
    /// Arrived at a node that has already withdrawn.
    WithdrawnTarget,
    /// Acknowledgment rules were broken.
    Violation(ProtocolViolation),
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub transition: Transition,
    /// Set when the envelope involved did not leave this node.
    pub discarded: Option<DiscardReason>,
    /// Set when handling the event made the node withdraw.
    pub relink: Option<Relink>,
}

impl Outcome {
    fn new(transition: Transition) -> Self {
        Self {
            transition,
            discarded: None,
            relink: None,
        }
    }

    fn dropped(reason: DiscardReason) -> Self {
        Self {
            transition: Transition::Dropped,
            discarded: Some(reason),
            relink: None,
        }
    }

    /// Whether the node withdrew while handling the event.
    pub fn withdrew(&self) -> bool {
        self.relink.is_some()
    }
}

/// Running totals for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub originated: u64,
    pub relayed: u64,
    pub acknowledged: u64,
    pub round_trips: u64,
    pub consumed_locally: u64,
    pub discarded: u64,
    pub violations: u64,
}

/// A ring participant.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    budget: u32,
    initial_budget: u32,
    is_originator: bool,
    target: Option<NodeId>,
    send_interval: Duration,
    state: NodeState,
    /// Timers armed and not yet fired.
    pending_timers: u32,
    next_seq: u32,
    stats: NodeStats,
}

impl Node {
    /// Create a node from validated settings.
    pub fn new(spec: &NodeSpec, config: &RingConfig) -> Self {
        info!(
            node = %spec.id,
            name = %spec.name,
            budget = spec.budget,
            originator = spec.is_originator,
            "node initialized"
        );
        Self {
            id: spec.id,
            name: spec.name.clone(),
            budget: spec.budget,
            initial_budget: spec.budget,
            is_originator: spec.is_originator,
            target: spec.target,
            send_interval: config.send_interval,
            state: NodeState::Idle,
            pending_timers: 0,
            next_seq: 0,
            stats: NodeStats::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hops this node may still perform.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn initial_budget(&self) -> u32 {
        self.initial_budget
    }

    pub fn is_originator(&self) -> bool {
        self.is_originator
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_withdrawn(&self) -> bool {
        self.state == NodeState::Withdrawn
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Timers this node has armed that have not fired yet.
    pub fn pending_timers(&self) -> u32 {
        self.pending_timers
    }

    /// Arm the first timer of an originator.
    ///
    /// Returns whether a timer was scheduled.
    pub fn start(&mut self, ring: &RingTopology, sched: &mut impl Scheduler, at: Timestamp) -> bool {
        if self.can_originate(ring) {
            self.arm(sched, at);
            true
        } else {
            false
        }
    }

    /// Handle this node's own timer.
    pub fn on_timer(
        &mut self,
        ring: &mut RingTopology,
        sched: &mut impl Scheduler,
        now: Timestamp,
    ) -> Outcome {
        match self.state {
            NodeState::Withdrawn => {
                warn!(node = %self.id, "timer fired for withdrawn node");
                return Outcome::new(Transition::Ignored);
            }
            NodeState::AwaitingNextTrigger | NodeState::Idle => {
                self.pending_timers = self.pending_timers.saturating_sub(1);
                if self.pending_timers == 0 {
                    self.state = NodeState::Idle;
                }
            }
        }

        let target = match self.target {
            Some(target) if self.can_originate(ring) => target,
            _ => {
                debug!(
                    node = %self.id,
                    budget = self.budget,
                    live_count = ring.live_count(),
                    "timer ignored"
                );
                return Outcome::new(Transition::Ignored);
            }
        };

        self.budget -= 1;
        self.stats.originated += 1;
        let envelope = Envelope::create(self.id, target, self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        debug!(
            node = %self.id,
            envelope = %envelope,
            budget = self.budget,
            "originating"
        );

        let mut outcome = Outcome::new(Transition::Originated);
        outcome.discarded = self.hand_off(envelope, ring, sched, now).err();
        self.settle(ring, sched, now, &mut outcome);
        outcome
    }

    /// Handle an envelope delivered to this node.
    pub fn on_envelope(
        &mut self,
        mut envelope: Envelope,
        ring: &mut RingTopology,
        sched: &mut impl Scheduler,
        now: Timestamp,
    ) -> Outcome {
        if self.is_withdrawn() {
            warn!(node = %self.id, envelope = %envelope, "envelope reached withdrawn node, discarding");
            self.stats.discarded += 1;
            return Outcome::dropped(DiscardReason::WithdrawnTarget);
        }

        debug!(node = %self.id, from = %envelope.last_forwarder(), envelope = %envelope, "received");

        let is_receiver = envelope.receiver() == self.id && !envelope.is_acknowledged();
        let is_returning = envelope.sender() == self.id && envelope.is_acknowledged();

        if ring.live_count() <= 1 {
            if is_receiver {
                debug!(node = %self.id, sender = %envelope.sender(), "receiver, acknowledging locally");
            } else if is_returning {
                debug!(node = %self.id, receiver = %envelope.receiver(), "own envelope acknowledged");
            }
            debug!(node = %self.id, "last node, deleting envelope");
            self.stats.consumed_locally += 1;
            return Outcome::new(Transition::ConsumedLocally);
        }

        if is_receiver {
            // Guard only: `is_receiver` already rules out both violations, so
            // this branch fires solely if the two checks ever disagree.
            if let Err(violation) = envelope.mark_acknowledged(self.id) {
                error!(node = %self.id, %violation, "protocol violation");
                self.stats.violations += 1;
                self.stats.discarded += 1;
                return Outcome::dropped(DiscardReason::Violation(violation));
            }
            self.stats.acknowledged += 1;
            debug!(node = %self.id, sender = %envelope.sender(), seq = envelope.seq(), "acknowledging");

            let mut outcome = Outcome::new(Transition::Acknowledged);
            outcome.discarded = self.hand_off(envelope, ring, sched, now).err();
            return outcome;
        }

        if is_returning {
            self.stats.round_trips += 1;
            debug!(
                node = %self.id,
                receiver = %envelope.receiver(),
                seq = envelope.seq(),
                hops = envelope.hops(),
                "round trip complete"
            );
            let mut outcome = Outcome::new(Transition::RoundTripComplete);
            if self.can_originate(ring) {
                self.schedule_next(sched, now);
            } else if self.budget == 0 {
                outcome.relink = self.withdraw_exhausted(ring);
            }
            return outcome;
        }

        if self.budget == 0 {
            debug!(node = %self.id, envelope = %envelope, "no budget to relay, deleting envelope");
            self.stats.discarded += 1;
            return Outcome::dropped(DiscardReason::ExhaustedRelay);
        }

        self.budget -= 1;
        self.stats.relayed += 1;
        debug!(node = %self.id, envelope = %envelope, budget = self.budget, "relaying");

        let mut outcome = Outcome::new(Transition::Relayed);
        outcome.discarded = self.hand_off(envelope, ring, sched, now).err();
        if self.budget == 0 && ring.live_count() > 1 {
            outcome.relink = self.withdraw_exhausted(ring);
        }
        outcome
    }

    /// Leave the ring regardless of budget.
    ///
    /// A sole live node stays put and `Ok(None)` is returned.
    pub fn withdraw(&mut self, ring: &mut RingTopology) -> RingResult<Option<Relink>> {
        let relink = ring.withdraw(self.id)?;
        if relink.is_some() {
            self.state = NodeState::Withdrawn;
            info!(node = %self.id, name = %self.name, budget = self.budget, "left the ring");
        }
        Ok(relink)
    }

    fn can_originate(&self, ring: &RingTopology) -> bool {
        self.is_originator && self.budget > 0 && ring.live_count() > 1
    }

    /// Reschedule or withdraw after an originate.
    fn settle(
        &mut self,
        ring: &mut RingTopology,
        sched: &mut impl Scheduler,
        now: Timestamp,
        outcome: &mut Outcome,
    ) {
        if ring.live_count() <= 1 {
            return;
        }
        if self.budget > 0 {
            self.schedule_next(sched, now);
        } else {
            outcome.relink = self.withdraw_exhausted(ring);
        }
    }

    /// Arm a timer one send interval from `now`.
    ///
    /// Sends and completed round trips each arm their own timer, so several
    /// may be outstanding at once.
    fn schedule_next(&mut self, sched: &mut impl Scheduler, now: Timestamp) {
        self.arm(sched, now + self.send_interval);
    }

    fn arm(&mut self, sched: &mut impl Scheduler, at: Timestamp) {
        sched.schedule(self.id, at);
        self.pending_timers += 1;
        self.state = NodeState::AwaitingNextTrigger;
    }

    fn withdraw_exhausted(&mut self, ring: &mut RingTopology) -> Option<Relink> {
        debug!(node = %self.id, "budget exhausted, withdrawing");
        match self.withdraw(ring) {
            Ok(relink) => relink,
            Err(err) => {
                warn!(node = %self.id, %err, "withdrawal failed");
                if matches!(err, RingError::RaceOnWithdrawnTarget { .. }) {
                    self.state = NodeState::Withdrawn;
                }
                None
            }
        }
    }

    /// Pass `envelope` to the current successor, or discard it.
    fn hand_off(
        &mut self,
        mut envelope: Envelope,
        ring: &RingTopology,
        sched: &mut impl Scheduler,
        now: Timestamp,
    ) -> Result<(), DiscardReason> {
        match ring.successor(self.id) {
            Ok(next) => {
                envelope.mark_forwarded(self.id);
                debug!(node = %self.id, to = %next, envelope = %envelope, "forwarding");
                sched.deliver(envelope, next, now);
                Ok(())
            }
            Err(err) => {
                warn!(node = %self.id, envelope = %envelope, %err, "outgoing edge not connected, deleting envelope");
                self.stats.discarded += 1;
                Err(DiscardReason::DisconnectedRoute)
            }
        }
    }
}
