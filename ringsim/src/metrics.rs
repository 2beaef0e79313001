//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use tokenring::{NodeId, Relink, Timestamp};

/// A snapshot of ring state at a point in time.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Live nodes in successor order, starting from the lowest id.
    pub order: Vec<NodeId>,
    /// Remaining budget of every node, live or withdrawn.
    pub budgets: HashMap<NodeId, u32>,
    /// Live count as held by the ring.
    pub live_count: usize,
    /// Whether the successor walk closed into one cycle covering all live nodes.
    pub is_single_cycle: bool,
}

impl RingSnapshot {
    /// Create a new empty snapshot.
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            order: Vec::new(),
            budgets: HashMap::new(),
            live_count: 0,
            is_single_cycle: true,
        }
    }

    /// Record a node's remaining budget.
    pub fn record_budget(&mut self, node_id: NodeId, budget: u32) {
        self.budgets.insert(node_id, budget);
    }

    /// Sum of all remaining budgets.
    pub fn total_budget(&self) -> u64 {
        self.budgets.values().map(|&b| u64::from(b)).sum()
    }

    /// Whether the ring has shrunk to a single node.
    pub fn is_degenerate(&self) -> bool {
        self.live_count <= 1
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Envelopes created by originators.
    pub envelopes_originated: u64,
    /// Budget-consuming relays.
    pub envelopes_relayed: u64,
    /// Acknowledgments performed by receivers.
    pub envelopes_acknowledged: u64,
    /// Acknowledgments that made it back to their originator.
    pub round_trips: u64,
    /// Envelopes dropped because the outgoing edge was gone.
    pub discarded_disconnected: u64,
    /// Envelopes dropped by relays with no budget left.
    pub discarded_exhausted: u64,
    /// Envelopes interpreted by the last live node.
    pub consumed_locally: u64,
    /// Deliveries addressed to nodes that had already withdrawn.
    pub deliveries_dropped: u64,
    /// Timers that fired after their node withdrew.
    pub timers_dropped: u64,
    /// Envelopes rejected for breaking acknowledgment rules.
    pub protocol_violations: u64,
    /// Completed withdrawals.
    pub withdrawals: u64,
    /// Timer events dispatched to live nodes.
    pub timer_fires: u64,
    /// Every relink, in order.
    pub relinks: Vec<(Timestamp, Relink)>,
    /// Ring snapshots taken at intervals.
    pub snapshots: Vec<RingSnapshot>,
}

impl SimMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot.
    pub fn add_snapshot(&mut self, snapshot: RingSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Record a withdrawal.
    pub fn record_relink(&mut self, time: Timestamp, relink: Relink) {
        self.withdrawals += 1;
        self.relinks.push((time, relink));
    }

    /// All discards, whatever the cause.
    pub fn total_discarded(&self) -> u64 {
        self.discarded_disconnected
            + self.discarded_exhausted
            + self.deliveries_dropped
            + self.protocol_violations
    }

    /// Whether every snapshot saw a single cycle.
    pub fn always_single_cycle(&self) -> bool {
        self.snapshots.iter().all(|s| s.is_single_cycle)
    }

    /// First snapshot time at which the ring had shrunk to one node.
    pub fn degenerate_since(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.is_degenerate())
            .map(|s| s.time)
    }

    /// Get the latest snapshot.
    pub fn latest_snapshot(&self) -> Option<&RingSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time or event limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Live count at the end of the run.
    pub fn final_live_count(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map(|s| s.live_count)
            .unwrap_or(0)
    }

    /// Ring order at the end of the run.
    pub fn final_order(&self) -> Vec<NodeId> {
        self.metrics
            .latest_snapshot()
            .map(|s| s.order.clone())
            .unwrap_or_default()
    }

    /// Whether the ring was a single cycle at the end of the run.
    pub fn ring_intact(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.is_single_cycle)
    }
}
