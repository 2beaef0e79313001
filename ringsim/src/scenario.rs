//! Scenario builder for setting up and running simulations.
//!
//! Nodes are addressed by position: node `i` gets `NodeId(i)` and the ring
//! visits them in index order.

use tokenring::{
    ConfigError, Duration, Envelope, NodeId, NodeSpec, RingConfig, Timestamp,
    DEFAULT_LINK_DELAY, DEFAULT_SEND_INTERVAL,
};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;

/// Budget given to every node unless overridden.
pub const DEFAULT_BUDGET: u32 = 3;

/// Scheduled action with node positions not yet resolved to ids.
#[derive(Debug, Clone)]
enum PendingAction {
    Withdraw {
        node: usize,
    },
    Inject {
        to: usize,
        sender: usize,
        receiver: usize,
    },
    SetLinkDelay(Duration),
    Snapshot,
}

/// Builder for simulation scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    /// Number of nodes to create.
    num_nodes: usize,
    /// Budget for every node when `budgets` is unset.
    budget: u32,
    /// Per-node budgets, by position.
    budgets: Option<Vec<u32>>,
    /// `(originator, target)` positions.
    originators: Vec<(usize, usize)>,
    /// Every node originates to the node half a ring away.
    all_originators: bool,
    send_interval: Duration,
    first_send_at: Duration,
    link_delay: Duration,
    /// Scheduled actions.
    actions: Vec<(Timestamp, PendingAction)>,
    /// Snapshot interval.
    snapshot_interval: Option<Duration>,
    record_deliveries: bool,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Nobody originates until [`originator`](Self::originator) or
    /// [`all_originators`](Self::all_originators) is called.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            budget: DEFAULT_BUDGET,
            budgets: None,
            originators: Vec::new(),
            all_originators: false,
            send_interval: DEFAULT_SEND_INTERVAL,
            first_send_at: Duration::ZERO,
            link_delay: DEFAULT_LINK_DELAY,
            actions: Vec::new(),
            snapshot_interval: None,
            record_deliveries: false,
        }
    }

    /// Give every node the same budget.
    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self.budgets = None;
        self
    }

    /// Give each node its own budget. The length must match the node count.
    pub fn with_budgets(mut self, budgets: Vec<u32>) -> Self {
        self.budgets = Some(budgets);
        self
    }

    /// Make node `index` an originator addressing node `target`.
    pub fn originator(mut self, index: usize, target: usize) -> Self {
        self.originators.push((index, target));
        self
    }

    /// Make every node an originator addressing the node `n / 2` places on.
    pub fn all_originators(mut self) -> Self {
        self.all_originators = true;
        self
    }

    /// Set link delay.
    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        self.link_delay = delay;
        self
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub fn with_first_send_at(mut self, offset: Duration) -> Self {
        self.first_send_at = offset;
        self
    }

    /// Set snapshot interval for metrics collection.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Keep the simulator's delivery log.
    pub fn with_delivery_log(mut self) -> Self {
        self.record_deliveries = true;
        self
    }

    /// Force node `index` out of the ring at `time`.
    pub fn withdraw_at(mut self, time: Timestamp, index: usize) -> Self {
        self.actions.push((time, PendingAction::Withdraw { node: index }));
        self
    }

    /// Hand node `to` a fresh envelope from `sender` for `receiver` at `time`.
    pub fn inject_at(mut self, time: Timestamp, to: usize, sender: usize, receiver: usize) -> Self {
        self.actions.push((
            time,
            PendingAction::Inject {
                to,
                sender,
                receiver,
            },
        ));
        self
    }

    /// Change the link delay at `time`.
    pub fn link_delay_at(mut self, time: Timestamp, delay: Duration) -> Self {
        self.actions.push((time, PendingAction::SetLinkDelay(delay)));
        self
    }

    /// Schedule a snapshot at the specified time.
    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, PendingAction::Snapshot));
        self
    }

    /// Build the simulator and return it with the node ids by position.
    pub fn build(self) -> Result<(Simulator, Vec<NodeId>), ConfigError> {
        let n = self.num_nodes;
        let node_ids: Vec<NodeId> = (0..n as u32).map(NodeId::new).collect();

        let budgets = match self.budgets {
            Some(budgets) if budgets.len() != n => {
                return Err(ConfigError::LengthMismatch {
                    expected: n,
                    actual: budgets.len(),
                });
            }
            Some(budgets) => budgets,
            None => vec![self.budget; n],
        };

        let mut specs: Vec<NodeSpec> = node_ids
            .iter()
            .zip(budgets)
            .map(|(&id, budget)| NodeSpec::new(id, budget))
            .collect();

        let mut roles = self.originators.clone();
        if self.all_originators {
            roles.extend((0..n).map(|i| (i, (i + n / 2) % n)));
        }
        for (index, target) in roles {
            check_index(index, n)?;
            check_index(target, n)?;
            specs[index] = specs[index].clone().originating_to(node_ids[target]);
        }

        let config = RingConfig::new()
            .with_send_interval(self.send_interval)
            .with_first_send_at(self.first_send_at)
            .with_link_delay(self.link_delay);
        let mut sim = Simulator::new(config, &specs)?;

        // Set snapshot interval if specified
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }
        if self.record_deliveries {
            sim = sim.with_delivery_log();
        }

        // Schedule actions (convert positions to actual NodeIds)
        let mut injected = 0u32;
        for (time, action) in self.actions {
            let action = match action {
                PendingAction::Withdraw { node } => {
                    check_index(node, n)?;
                    ScenarioAction::Withdraw {
                        node: node_ids[node],
                    }
                }
                PendingAction::Inject {
                    to,
                    sender,
                    receiver,
                } => {
                    check_index(to, n)?;
                    check_index(sender, n)?;
                    check_index(receiver, n)?;
                    let envelope = Envelope::create(node_ids[sender], node_ids[receiver], injected);
                    injected += 1;
                    ScenarioAction::Inject {
                        to: node_ids[to],
                        envelope,
                    }
                }
                PendingAction::SetLinkDelay(delay) => ScenarioAction::SetLinkDelay { delay },
                PendingAction::Snapshot => ScenarioAction::TakeSnapshot,
            };
            sim.schedule_action(time, action);
        }

        Ok((sim, node_ids))
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, ConfigError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, ConfigError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }

    /// Build and run until the queue drains or `max_events` is reached.
    pub fn run_to_quiescence(self, max_events: usize) -> Result<SimulationResult, ConfigError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_to_quiescence(max_events))
    }
}

/// Convenience function for an N-node ring where node 0 addresses the node
/// opposite it.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).originator(0, num_nodes / 2)
}

fn check_index(index: usize, len: usize) -> Result<(), ConfigError> {
    if index < len {
        Ok(())
    } else {
        Err(ConfigError::IndexOutOfRange { index, len })
    }
}
