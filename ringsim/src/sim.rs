//! Discrete event simulator for the token ring.

use hashbrown::HashMap;
use tokenring::{
    ConfigError, DiscardReason, Duration, Envelope, Node, NodeId, NodeSpec, Outcome, Relink,
    RingConfig, RingError, RingResult, RingTopology, Timestamp, Transition,
};
use tracing::{debug, error, info, trace, warn};

use crate::event::{Event, EventQueue, ScenarioAction};
use crate::metrics::{RingSnapshot, SimMetrics, SimulationResult};

/// One envelope arrival handed to a live node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub time: Timestamp,
    /// Last forwarder when the envelope left, or the injecting party.
    pub from: NodeId,
    pub to: NodeId,
    /// The envelope as it arrived.
    pub envelope: Envelope,
}

/// Discrete event simulator for token rings.
pub struct Simulator {
    config: RingConfig,
    /// Owner of all adjacency.
    ring: RingTopology,
    /// Every node ever in the ring, including withdrawn ones.
    nodes: HashMap<NodeId, Node>,
    /// Pending events; also the scheduler handed to nodes.
    queue: EventQueue,
    /// Current simulation time.
    current_time: Timestamp,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Arrivals in dispatch order, kept only when `record_deliveries` is set.
    delivery_log: Vec<DeliveryRecord>,
    record_deliveries: bool,
    /// Interval for automatic snapshots.
    snapshot_interval: Option<Duration>,
    /// Next snapshot time.
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Build a ring visiting `specs` in order and arm the originators.
    pub fn new(config: RingConfig, specs: &[NodeSpec]) -> Result<Self, ConfigError> {
        let order: Vec<NodeId> = specs.iter().map(|s| s.id).collect();
        let ring = RingTopology::from_order(&order)?;
        Self::with_ring(config, specs, ring)
    }

    /// Pair node settings with an already built ring and arm the originators.
    ///
    /// Every [`NodeSpec`] must name a live member of `ring` and every live member
    /// must have one.
    pub fn with_ring(
        config: RingConfig,
        specs: &[NodeSpec],
        ring: RingTopology,
    ) -> Result<Self, ConfigError> {
        config.validate_nodes(specs)?;
        if specs.len() != ring.live_count() {
            return Err(ConfigError::LengthMismatch {
                expected: ring.live_count(),
                actual: specs.len(),
            });
        }
        if let Some(stray) = specs.iter().find(|s| !ring.is_live(s.id)) {
            return Err(ConfigError::NotInRing(stray.id));
        }

        let mut queue = EventQueue::new(config.link_delay);
        let first_send = Timestamp::ZERO + config.first_send_at;
        let mut nodes = HashMap::with_capacity(specs.len());
        for spec in specs {
            let mut node = Node::new(spec, &config);
            node.start(&ring, &mut queue, first_send);
            nodes.insert(spec.id, node);
        }

        info!(
            nodes = specs.len(),
            originators = specs.iter().filter(|s| s.is_originator).count(),
            link_delay_ms = config.link_delay.as_millis(),
            "simulation ready"
        );

        Ok(Self {
            config,
            ring,
            nodes,
            queue,
            current_time: Timestamp::ZERO,
            metrics: SimMetrics::new(),
            delivery_log: Vec::new(),
            record_deliveries: false,
            snapshot_interval: None,
            next_snapshot: None,
        })
    }

    /// Set the snapshot interval for automatic ring state recording.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Keep a copy of every envelope handed to a live node.
    ///
    /// Off by default; the log grows with every hop.
    pub fn with_delivery_log(mut self) -> Self {
        self.record_deliveries = true;
        self
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get all node IDs, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Get the current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Get the ring.
    pub fn ring(&self) -> &RingTopology {
        &self.ring
    }

    /// Get collected metrics.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Envelope arrivals handed to live nodes, in dispatch order.
    ///
    /// Empty unless [`with_delivery_log`](Self::with_delivery_log) was called.
    pub fn delivery_log(&self) -> &[DeliveryRecord] {
        &self.delivery_log
    }

    /// Events still waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.queue.push(time, Event::ScenarioAction(action));
    }

    /// Hand `envelope` to `to` at `time`, bypassing the ring's edges.
    pub fn inject_envelope(&mut self, time: Timestamp, to: NodeId, envelope: Envelope) {
        self.schedule_action(time, ScenarioAction::Inject { to, envelope });
    }

    /// Force `id` out of the ring now.
    ///
    /// Returns `Ok(None)` when `id` is the last live node.
    pub fn withdraw(&mut self, id: NodeId) -> RingResult<Option<Relink>> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(RingError::UnknownNode { node: id })?;
        if node.is_withdrawn() {
            debug!(node = %id, "already withdrawn");
            return Ok(None);
        }
        let relink = node.withdraw(&mut self.ring)?;
        match relink {
            Some(relink) => {
                info!(node = %id, time = %self.current_time, "forced withdrawal");
                self.record_relink(relink);
            }
            None => debug!(node = %id, "forced withdrawal refused, last live node"),
        }
        Ok(relink)
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(event) = self.queue.peek() {
            if event.time > end_time {
                break;
            }

            let Some(event) = self.queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);

            // Check for snapshot
            self.maybe_take_snapshot();
        }

        // Advance to end_time even if no more events
        self.advance_time(end_time);

        // Final snapshot
        self.take_snapshot();

        self.result()
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Run until event queue is empty or max events processed.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        let mut processed = 0;

        while processed < max_events {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            processed += 1;

            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        self.result()
    }

    /// Drain the queue, giving up after `max_events`.
    pub fn run_to_quiescence(&mut self, max_events: usize) -> SimulationResult {
        let result = self.run_events(max_events);
        if !result.queue_exhausted {
            warn!(
                max_events,
                pending = self.queue.len(),
                "event cap reached before the ring went quiet"
            );
        }
        result
    }

    fn result(&self) -> SimulationResult {
        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.queue.is_empty(),
        }
    }

    /// Advance simulation time.
    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    /// Process a single event.
    fn process_event(&mut self, event: Event) {
        trace!(time = %self.current_time, target = ?event.target(), "event");
        match event {
            Event::Delivery { to, envelope } => {
                self.deliver_envelope(to, envelope);
            }
            Event::TimerFire { node } => {
                self.fire_timer(node);
            }
            Event::ScenarioAction(action) => {
                self.execute_action(action);
            }
        }
    }

    /// Deliver an envelope to a node.
    fn deliver_envelope(&mut self, to: NodeId, envelope: Envelope) {
        let now = self.current_time;
        let node = match self.nodes.get_mut(&to) {
            Some(node) if self.ring.is_live(to) => node,
            _ => {
                warn!(to = %to, envelope = %envelope, "delivery to a node outside the ring, dropping");
                self.metrics.deliveries_dropped += 1;
                return;
            }
        };

        if self.record_deliveries {
            self.delivery_log.push(DeliveryRecord {
                time: now,
                from: envelope.last_forwarder(),
                to,
                envelope: envelope.clone(),
            });
        }
        let outcome = node.on_envelope(envelope, &mut self.ring, &mut self.queue, now);
        self.apply_outcome(outcome);
    }

    /// Fire timer for a node.
    fn fire_timer(&mut self, node_id: NodeId) {
        let now = self.current_time;
        let node = match self.nodes.get_mut(&node_id) {
            Some(node) if self.ring.is_live(node_id) => node,
            _ => {
                debug!(node = %node_id, "timer for a node outside the ring, dropping");
                self.metrics.timers_dropped += 1;
                return;
            }
        };

        self.metrics.timer_fires += 1;
        let outcome = node.on_timer(&mut self.ring, &mut self.queue, now);
        self.apply_outcome(outcome);
    }

    /// Fold a handler's outcome into the metrics.
    fn apply_outcome(&mut self, outcome: Outcome) {
        match outcome.transition {
            Transition::Originated => self.metrics.envelopes_originated += 1,
            Transition::Acknowledged => self.metrics.envelopes_acknowledged += 1,
            Transition::Relayed => self.metrics.envelopes_relayed += 1,
            Transition::RoundTripComplete => self.metrics.round_trips += 1,
            Transition::ConsumedLocally => self.metrics.consumed_locally += 1,
            Transition::Dropped | Transition::Ignored => {}
        }

        match outcome.discarded {
            Some(DiscardReason::DisconnectedRoute) => self.metrics.discarded_disconnected += 1,
            Some(DiscardReason::ExhaustedRelay) => self.metrics.discarded_exhausted += 1,
            Some(DiscardReason::WithdrawnTarget) => self.metrics.deliveries_dropped += 1,
            Some(DiscardReason::Violation(_)) => self.metrics.protocol_violations += 1,
            None => {}
        }

        if let Some(relink) = outcome.relink {
            self.record_relink(relink);
        }
    }

    fn record_relink(&mut self, relink: Relink) {
        self.metrics.record_relink(self.current_time, relink);
        if let Err(err) = self.ring.check_invariants() {
            error!(%err, withdrawn = %relink.withdrawn, "ring broken after relink");
        }
    }

    /// Execute a scenario action.
    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Withdraw { node } => {
                if let Err(err) = self.withdraw(node) {
                    warn!(node = %node, %err, "scheduled withdrawal failed");
                }
            }
            ScenarioAction::Inject { to, envelope } => {
                debug!(to = %to, envelope = %envelope, "injecting");
                self.deliver_envelope(to, envelope);
            }
            ScenarioAction::SetLinkDelay { delay } => {
                self.queue.set_link_delay(delay);
            }
            ScenarioAction::TakeSnapshot => {
                self.take_snapshot();
            }
        }
    }

    /// Check if we should take a snapshot and do so.
    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Take a ring state snapshot.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = RingSnapshot::new(self.current_time);
        snapshot.order = self.ring.order();
        snapshot.live_count = self.ring.live_count();
        snapshot.is_single_cycle = self.ring.check_invariants().is_ok();

        for (node_id, node) in &self.nodes {
            snapshot.record_budget(*node_id, node.budget());
        }

        self.metrics.add_snapshot(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use tokenring::ProtocolViolation;

    use super::*;

    fn specs(n: u32, budget: u32) -> Vec<NodeSpec> {
        (0..n).map(|i| NodeSpec::new(NodeId(i), budget)).collect()
    }

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(RingConfig::default(), &specs(3, 2)).unwrap();
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert_eq!(sim.node_ids(), vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert_eq!(sim.ring().live_count(), 3);
        // Nobody originates, so nothing is scheduled
        assert_eq!(sim.pending_events(), 0);
    }

    #[test]
    fn test_rejects_mismatched_ring() {
        let ring = RingTopology::from_order(&[NodeId(0), NodeId(1)]).unwrap();
        let err = Simulator::with_ring(RingConfig::default(), &specs(3, 1), ring)
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::LengthMismatch {
                expected: 2,
                actual: 3
            }
        );

        let ring = RingTopology::from_order(&[NodeId(0), NodeId(5)]).unwrap();
        let err = Simulator::with_ring(RingConfig::default(), &specs(2, 1), ring)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::NotInRing(NodeId(1)));
    }

    #[test]
    fn test_first_send_offset() {
        let mut nodes = specs(3, 1);
        nodes[0] = nodes[0].clone().originating_to(NodeId(1));
        let config = RingConfig::default().with_first_send_at(Duration::from_millis(250));
        let mut sim = Simulator::new(config, &nodes).unwrap();

        sim.run_until(Timestamp::from_millis(249));
        assert_eq!(sim.metrics().envelopes_originated, 0);

        sim.run_until(Timestamp::from_millis(250));
        assert_eq!(sim.metrics().envelopes_originated, 1);
    }

    #[test]
    fn test_delivery_to_withdrawn_node_is_dropped() {
        let mut nodes = specs(4, 3);
        nodes[0] = nodes[0].clone().originating_to(NodeId(2));
        let mut sim = Simulator::new(RingConfig::default(), &nodes)
            .unwrap()
            .with_delivery_log();

        // In flight towards node1 when it leaves
        sim.run_until(Timestamp::from_millis(50));
        sim.withdraw(NodeId(1)).unwrap();
        sim.run_until(Timestamp::from_millis(150));

        assert_eq!(sim.metrics().deliveries_dropped, 1);
        assert_eq!(sim.node(NodeId(1)).unwrap().budget(), 3);
        assert!(sim.delivery_log().is_empty());
        sim.ring().check_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_unknown_node() {
        let mut sim = Simulator::new(RingConfig::default(), &specs(2, 1)).unwrap();
        assert_eq!(
            sim.withdraw(NodeId(9)),
            Err(RingError::UnknownNode { node: NodeId(9) })
        );
    }

    #[test]
    fn test_withdraw_twice_is_noop() {
        let mut sim = Simulator::new(RingConfig::default(), &specs(3, 1)).unwrap();
        assert!(sim.withdraw(NodeId(1)).unwrap().is_some());
        assert_eq!(sim.withdraw(NodeId(1)), Ok(None));
        assert_eq!(sim.metrics().withdrawals, 1);
        assert_eq!(sim.ring().live_count(), 2);
    }

    #[test]
    fn test_set_link_delay_action() {
        let mut nodes = specs(3, 5);
        nodes[0] = nodes[0].clone().originating_to(NodeId(1));
        let mut sim = Simulator::new(RingConfig::default(), &nodes)
            .unwrap()
            .with_delivery_log();
        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::SetLinkDelay {
                delay: Duration::from_millis(10),
            },
        );

        sim.run_until(Timestamp::from_millis(1_010));
        let arrivals: Vec<Timestamp> = sim
            .delivery_log()
            .iter()
            .filter(|r| r.from == NodeId(0))
            .map(|r| r.time)
            .collect();
        assert_eq!(
            arrivals,
            vec![Timestamp::from_millis(100), Timestamp::from_millis(1_010)]
        );
    }

    #[test]
    fn test_delivery_log_is_off_by_default() {
        let mut nodes = specs(3, 5);
        nodes[0] = nodes[0].clone().originating_to(NodeId(1));
        let mut sim = Simulator::new(RingConfig::default(), &nodes).unwrap();

        let result = sim.run_until(Timestamp::from_millis(300));
        assert_eq!(result.metrics.round_trips, 1);
        assert!(sim.delivery_log().is_empty());
    }

    #[test]
    fn test_violation_outcome_is_counted() {
        let mut sim = Simulator::new(RingConfig::default(), &specs(3, 1)).unwrap();
        sim.apply_outcome(Outcome {
            transition: Transition::Dropped,
            discarded: Some(DiscardReason::Violation(
                ProtocolViolation::DoubleAcknowledgment {
                    sender: NodeId(0),
                    receiver: NodeId(2),
                    seq: 4,
                },
            )),
            relink: None,
        });

        assert_eq!(sim.metrics().protocol_violations, 1);
        assert_eq!(sim.metrics().total_discarded(), 1);
        assert_eq!(sim.metrics().deliveries_dropped, 0);
    }

    #[test]
    fn test_snapshot_interval() {
        let mut sim = Simulator::new(RingConfig::default(), &specs(2, 1))
            .unwrap()
            .with_snapshot_interval(Duration::from_secs(1));
        for secs in 1..=3 {
            sim.schedule_action(Timestamp::from_secs(secs), ScenarioAction::TakeSnapshot);
        }

        let result = sim.run_for(Duration::from_secs(3));
        assert!(result.metrics.snapshots.len() >= 3);
        assert!(result.metrics.always_single_cycle());
        assert_eq!(result.final_order(), vec![NodeId(0), NodeId(1)]);
        assert!(result.queue_exhausted);
    }
}
