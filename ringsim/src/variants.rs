//! Fixed-shape relatives of the self-reconfiguring ring.
//!
//! Neither variant removes nodes, so they run as plain step loops without
//! the event queue.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokenring::{ConfigError, NodeId};
use tracing::{debug, info};

use crate::topology::Topology;

/// Outcome of a [`CounterRing`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRunReport {
    /// Token deliveries performed.
    pub hops: u64,
    /// Nodes that deleted a token, in the order they did so.
    pub absorbed_by: Vec<NodeId>,
    /// Remaining counter of every node, by position. Negative once a node
    /// has received more tokens than its limit.
    pub counters: Vec<i64>,
    /// Tokens still travelling when the run stopped.
    pub in_flight: usize,
}

/// Fixed ring where every receipt costs the receiving node one unit of
/// counter and a node deletes whatever token brings it to exactly zero.
///
/// The counter keeps falling past zero, so a node that already deleted a
/// token passes later ones on.
#[derive(Debug, Clone)]
pub struct CounterRing {
    counters: Vec<i64>,
    starters: Vec<bool>,
}

impl CounterRing {
    /// Ring of `limits.len()` nodes where node `i` passes to `i + 1`.
    pub fn new(limits: Vec<u32>, starters: Vec<bool>) -> Result<Self, ConfigError> {
        if limits.is_empty() {
            return Err(ConfigError::EmptyRing);
        }
        if starters.len() != limits.len() {
            return Err(ConfigError::LengthMismatch {
                expected: limits.len(),
                actual: starters.len(),
            });
        }
        Ok(Self {
            counters: limits.into_iter().map(i64::from).collect(),
            starters,
        })
    }

    /// Pass tokens until all are deleted or `max_steps` deliveries happened.
    pub fn run(mut self, max_steps: u64) -> CounterRunReport {
        let n = self.counters.len();
        // Each entry is the position the token is travelling to.
        let mut in_flight: VecDeque<usize> = self
            .starters
            .iter()
            .enumerate()
            .filter(|(_, &start)| start)
            .map(|(i, _)| (i + 1) % n)
            .collect();
        let mut hops = 0;
        let mut absorbed_by = Vec::new();

        while hops < max_steps {
            let Some(at) = in_flight.pop_front() else {
                break;
            };
            hops += 1;
            let counter = &mut self.counters[at];
            *counter -= 1;
            if *counter == 0 {
                info!(node = %NodeId(at as u32), "counter reached zero, deleting token");
                absorbed_by.push(NodeId(at as u32));
            } else {
                debug!(node = %NodeId(at as u32), counter = *counter, "passing token on");
                in_flight.push_back((at + 1) % n);
            }
        }

        CounterRunReport {
            hops,
            absorbed_by,
            counters: self.counters,
            in_flight: in_flight.len(),
        }
    }
}

/// Outcome of one [`RandomWalk::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    /// Every holder of the message, starting with the sender.
    pub path: Vec<NodeId>,
    /// Whether the receiver ended up holding the message.
    pub delivered: bool,
    /// Forwards performed during this walk.
    pub forwards: u64,
}

/// Forwards a message out of a uniformly chosen gate until it reaches its
/// receiver.
#[derive(Debug)]
pub struct RandomWalk {
    topology: Topology,
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(topology: Topology, seed: u64) -> Self {
        Self {
            topology,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Walk one message from `sender` towards `receiver`.
    ///
    /// Stops undelivered after `max_hops` forwards or at a holder with no
    /// active gate.
    pub fn walk(&mut self, sender: NodeId, receiver: NodeId, max_hops: u64) -> WalkReport {
        let mut path = vec![sender];
        let mut holder = sender;
        let mut forwards = 0;

        while holder != receiver && forwards < max_hops {
            let gates = self.topology.neighbors(holder);
            if gates.is_empty() {
                debug!(node = %holder, "no gates, walk stuck");
                break;
            }
            let k = self.rng.gen_range(0..gates.len());
            forwards += 1;
            debug!(node = %holder, gate = k, to = %gates[k], forwards, "forwarding");
            holder = gates[k];
            path.push(holder);
        }

        let delivered = holder == receiver;
        if delivered {
            info!(receiver = %receiver, forwards, "message arrived");
        }
        WalkReport {
            path,
            delivered,
            forwards,
        }
    }
}
