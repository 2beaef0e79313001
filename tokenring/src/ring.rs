//! The live cycle and the withdrawal/relink algorithm.
//!
//! [`RingTopology`] is the only owner of adjacency. Nodes hold identities,
//! never references to each other, and look their neighbors up here. Once a
//! node withdraws its identity moves to a retired set, so a stale id always
//! resolves to "not live" instead of to a dangling edge.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{ConfigError, RingError, RingResult};
use crate::types::NodeId;

/// Edges of one live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjacency {
    pub predecessor: NodeId,
    pub successor: NodeId,
}

/// Record of one completed withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relink {
    /// The node that left.
    pub withdrawn: NodeId,
    /// Its former predecessor, now pointing at `successor`.
    pub predecessor: NodeId,
    /// Its former successor, now pointed at by `predecessor`.
    pub successor: NodeId,
    /// Live nodes remaining after the splice.
    pub live_after: usize,
}

/// Directed cycle over the live node identities.
#[derive(Debug, Clone)]
pub struct RingTopology {
    /// Adjacency for live nodes only.
    edges: HashMap<NodeId, Adjacency>,
    /// Identities that have withdrawn. Never shrinks.
    retired: HashSet<NodeId>,
    live_count: usize,
    relinks: Vec<Relink>,
}

impl RingTopology {
    /// Build a cycle visiting `order` front to back and wrapping around.
    pub fn from_order(order: &[NodeId]) -> Result<Self, ConfigError> {
        if order.is_empty() {
            return Err(ConfigError::EmptyRing);
        }

        let n = order.len();
        let mut edges = HashMap::with_capacity(n);
        for (i, &id) in order.iter().enumerate() {
            let adjacency = Adjacency {
                predecessor: order[(i + n - 1) % n],
                successor: order[(i + 1) % n],
            };
            if edges.insert(id, adjacency).is_some() {
                return Err(ConfigError::DuplicateNode(id));
            }
        }

        for &id in order {
            info!(node = %id, successor = %edges[&id].successor, "ring member initialized");
        }

        Ok(Self {
            edges,
            retired: HashSet::new(),
            live_count: n,
            relinks: Vec::new(),
        })
    }

    /// Build a cycle from an explicit successor table.
    ///
    /// The table must describe exactly one cycle through every key.
    pub fn from_successors(successors: &HashMap<NodeId, NodeId>) -> Result<Self, ConfigError> {
        let start = successors
            .keys()
            .copied()
            .min()
            .ok_or(ConfigError::EmptyRing)?;

        let mut order = Vec::with_capacity(successors.len());
        let mut seen = HashSet::with_capacity(successors.len());
        let mut current = start;
        loop {
            if !seen.insert(current) {
                return Err(ConfigError::NotASingleCycle(format!(
                    "{current} is reached twice before returning to {start}"
                )));
            }
            order.push(current);
            let next = *successors.get(&current).ok_or_else(|| {
                ConfigError::NotASingleCycle(format!("{current} has no successor"))
            })?;
            if !successors.contains_key(&next) {
                return Err(ConfigError::NotASingleCycle(format!(
                    "{current} points at unknown {next}"
                )));
            }
            if next == start {
                break;
            }
            current = next;
        }

        if order.len() != successors.len() {
            return Err(ConfigError::NotASingleCycle(format!(
                "cycle through {start} covers {} of {} nodes",
                order.len(),
                successors.len()
            )));
        }

        Self::from_order(&order)
    }

    /// Number of live nodes.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Whether `id` is currently part of the cycle.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.edges.contains_key(&id)
    }

    /// Whether `id` was part of the cycle and has withdrawn.
    pub fn is_retired(&self, id: NodeId) -> bool {
        self.retired.contains(&id)
    }

    /// Edges of a live node.
    pub fn adjacency(&self, id: NodeId) -> RingResult<Adjacency> {
        match self.edges.get(&id) {
            Some(adjacency) => Ok(*adjacency),
            None if self.retired.contains(&id) => Err(RingError::DisconnectedRoute { from: id }),
            None => Err(RingError::UnknownNode { node: id }),
        }
    }

    /// Where `id`'s outgoing edge currently leads.
    pub fn successor(&self, id: NodeId) -> RingResult<NodeId> {
        self.adjacency(id).map(|a| a.successor)
    }

    /// Which node currently points at `id`.
    pub fn predecessor(&self, id: NodeId) -> RingResult<NodeId> {
        self.adjacency(id).map(|a| a.predecessor)
    }

    /// Check that an envelope may be handed to `id`.
    pub fn resolve_target(&self, id: NodeId) -> RingResult<()> {
        if self.edges.contains_key(&id) {
            Ok(())
        } else if self.retired.contains(&id) {
            Err(RingError::RaceOnWithdrawnTarget { node: id })
        } else {
            Err(RingError::UnknownNode { node: id })
        }
    }

    /// Splice `id` out of the cycle.
    ///
    /// Returns `Ok(None)` when `id` is the sole live node: a lone node never
    /// removes itself. Otherwise its predecessor is linked to its successor,
    /// the live count drops by one, and the identity is retired, all before
    /// this call returns.
    pub fn withdraw(&mut self, id: NodeId) -> RingResult<Option<Relink>> {
        self.resolve_target(id)?;

        if self.live_count <= 1 {
            debug!(node = %id, "sole live node, withdrawal suppressed");
            return Ok(None);
        }

        let Adjacency {
            predecessor,
            successor,
        } = self
            .edges
            .remove(&id)
            .ok_or(RingError::UnknownNode { node: id })?;

        // With two live nodes predecessor == successor, which leaves it self-looped.
        self.edges
            .get_mut(&predecessor)
            .ok_or_else(|| RingError::Corrupt(format!("{id}'s predecessor {predecessor} is not live")))?
            .successor = successor;
        self.edges
            .get_mut(&successor)
            .ok_or_else(|| RingError::Corrupt(format!("{id}'s successor {successor} is not live")))?
            .predecessor = predecessor;

        self.live_count -= 1;
        self.retired.insert(id);

        let relink = Relink {
            withdrawn: id,
            predecessor,
            successor,
            live_after: self.live_count,
        };
        self.relinks.push(relink);

        info!(
            node = %id,
            old_predecessor = %predecessor,
            old_successor = %successor,
            live_count = self.live_count,
            "withdrawn, relinked {predecessor} -> {successor}"
        );

        Ok(Some(relink))
    }

    /// Follow successor edges from `start` until returning to it.
    ///
    /// Stops after `live_count` steps even if the cycle is broken, so the
    /// caller can detect corruption instead of looping forever.
    pub fn walk_from(&self, start: NodeId) -> RingResult<Vec<NodeId>> {
        let mut visited = Vec::with_capacity(self.live_count);
        let mut current = start;
        for _ in 0..self.live_count {
            visited.push(current);
            current = self.successor(current)?;
            if current == start {
                break;
            }
        }
        Ok(visited)
    }

    /// Live nodes in cycle order, starting from the lowest id.
    pub fn order(&self) -> Vec<NodeId> {
        match self.edges.keys().copied().min() {
            Some(start) => self.walk_from(start).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Live nodes sorted by id.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.edges.keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// Retired nodes sorted by id.
    pub fn retired_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.retired.iter().copied().collect();
        nodes.sort();
        nodes
    }

    /// All withdrawals so far, in the order they happened.
    pub fn relinks(&self) -> &[Relink] {
        &self.relinks
    }

    /// Verify the structural invariants.
    ///
    /// - every live node's edges resolve to live nodes, and they agree
    ///   (`pred(succ(x)) == x`);
    /// - following successors from any live node visits every live node
    ///   exactly once and returns after exactly `live_count` hops;
    /// - a lone node is its own predecessor and successor.
    pub fn check_invariants(&self) -> RingResult<()> {
        if self.edges.len() != self.live_count {
            return Err(RingError::Corrupt(format!(
                "live_count is {} but {} nodes have edges",
                self.live_count,
                self.edges.len()
            )));
        }

        for (&id, adjacency) in &self.edges {
            if self.retired.contains(&id) {
                return Err(RingError::Corrupt(format!("{id} is both live and retired")));
            }
            let succ = self.edges.get(&adjacency.successor).ok_or_else(|| {
                RingError::Corrupt(format!("{id} points at non-live {}", adjacency.successor))
            })?;
            if succ.predecessor != id {
                return Err(RingError::Corrupt(format!(
                    "{id} -> {} but {}'s predecessor is {}",
                    adjacency.successor, adjacency.successor, succ.predecessor
                )));
            }
            if !self.edges.contains_key(&adjacency.predecessor) {
                return Err(RingError::Corrupt(format!(
                    "{id}'s predecessor {} is not live",
                    adjacency.predecessor
                )));
            }
        }

        // Successor is a bijection on live nodes; one full orbit means one cycle.
        if let Some(&start) = self.edges.keys().next() {
            let mut seen = HashSet::with_capacity(self.live_count);
            let mut current = start;
            loop {
                if !seen.insert(current) {
                    return Err(RingError::Corrupt(format!("{current} visited twice")));
                }
                current = self.edges[&current].successor;
                if current == start {
                    break;
                }
            }
            if seen.len() != self.live_count {
                return Err(RingError::Corrupt(format!(
                    "cycle through {start} has {} nodes, live_count is {}",
                    seen.len(),
                    self.live_count
                )));
            }
        }

        if self.live_count == 1 {
            let (&id, adjacency) = self
                .edges
                .iter()
                .next()
                .ok_or_else(|| RingError::Corrupt("live_count is 1 with no edges".into()))?;
            if adjacency.predecessor != id || adjacency.successor != id {
                return Err(RingError::Corrupt(format!("sole node {id} is not self-looped")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn make_nodes(count: u32) -> Vec<NodeId> {
        (0..count).map(NodeId).collect()
    }

    #[test]
    fn test_from_order() {
        let nodes = make_nodes(4);
        let ring = RingTopology::from_order(&nodes).unwrap();

        assert_eq!(ring.live_count(), 4);
        assert_eq!(ring.successor(nodes[0]), Ok(nodes[1]));
        assert_eq!(ring.successor(nodes[3]), Ok(nodes[0]));
        assert_eq!(ring.predecessor(nodes[0]), Ok(nodes[3]));
        assert_eq!(ring.order(), nodes);
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_from_order_rejects_bad_input() {
        assert_eq!(
            RingTopology::from_order(&[]).unwrap_err(),
            ConfigError::EmptyRing
        );
        assert_eq!(
            RingTopology::from_order(&[NodeId(1), NodeId(2), NodeId(1)]).unwrap_err(),
            ConfigError::DuplicateNode(NodeId(1))
        );
    }

    #[test]
    fn test_single_node_is_self_looped() {
        let ring = RingTopology::from_order(&[NodeId(9)]).unwrap();
        assert_eq!(ring.successor(NodeId(9)), Ok(NodeId(9)));
        assert_eq!(ring.predecessor(NodeId(9)), Ok(NodeId(9)));
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_from_successors() {
        let mut table = HashMap::new();
        table.insert(NodeId(0), NodeId(2));
        table.insert(NodeId(2), NodeId(1));
        table.insert(NodeId(1), NodeId(0));

        let ring = RingTopology::from_successors(&table).unwrap();
        assert_eq!(ring.order(), vec![NodeId(0), NodeId(2), NodeId(1)]);
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_from_successors_rejects_split_cycles() {
        // Two 2-cycles
        let mut table = HashMap::new();
        table.insert(NodeId(0), NodeId(1));
        table.insert(NodeId(1), NodeId(0));
        table.insert(NodeId(2), NodeId(3));
        table.insert(NodeId(3), NodeId(2));
        assert!(matches!(
            RingTopology::from_successors(&table),
            Err(ConfigError::NotASingleCycle(_))
        ));

        // Lollipop: 0 -> 1 -> 2 -> 1
        let mut table = HashMap::new();
        table.insert(NodeId(0), NodeId(1));
        table.insert(NodeId(1), NodeId(2));
        table.insert(NodeId(2), NodeId(1));
        assert!(matches!(
            RingTopology::from_successors(&table),
            Err(ConfigError::NotASingleCycle(_))
        ));

        // Dangling successor
        let mut table = HashMap::new();
        table.insert(NodeId(0), NodeId(5));
        assert!(matches!(
            RingTopology::from_successors(&table),
            Err(ConfigError::NotASingleCycle(_))
        ));

        assert_eq!(
            RingTopology::from_successors(&HashMap::new()).unwrap_err(),
            ConfigError::EmptyRing
        );
    }

    #[test]
    fn test_withdraw_relinks_neighbors() {
        let nodes = make_nodes(4);
        let mut ring = RingTopology::from_order(&nodes).unwrap();

        let relink = ring.withdraw(nodes[1]).unwrap().unwrap();
        assert_eq!(
            relink,
            Relink {
                withdrawn: nodes[1],
                predecessor: nodes[0],
                successor: nodes[2],
                live_after: 3,
            }
        );
        assert_eq!(ring.successor(nodes[0]), Ok(nodes[2]));
        assert_eq!(ring.predecessor(nodes[2]), Ok(nodes[0]));
        assert!(!ring.is_live(nodes[1]));
        assert!(ring.is_retired(nodes[1]));
        assert_eq!(ring.order(), vec![nodes[0], nodes[2], nodes[3]]);
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_down_to_one() {
        let nodes = make_nodes(4);
        let mut ring = RingTopology::from_order(&nodes).unwrap();

        for &id in &nodes[..3] {
            assert!(ring.withdraw(id).unwrap().is_some());
            ring.check_invariants().unwrap();
        }

        assert_eq!(ring.live_count(), 1);
        assert_eq!(ring.relinks().len(), 3);
        assert_eq!(ring.successor(nodes[3]), Ok(nodes[3]));
        assert_eq!(ring.predecessor(nodes[3]), Ok(nodes[3]));

        // The last node stays put
        assert_eq!(ring.withdraw(nodes[3]), Ok(None));
        assert_eq!(ring.live_count(), 1);
        assert!(ring.is_live(nodes[3]));
        assert_eq!(ring.relinks().len(), 3);
    }

    #[test]
    fn test_withdrawn_identity_resolves_to_not_live() {
        let nodes = make_nodes(3);
        let mut ring = RingTopology::from_order(&nodes).unwrap();
        ring.withdraw(nodes[0]).unwrap();

        assert_eq!(
            ring.successor(nodes[0]),
            Err(RingError::DisconnectedRoute { from: nodes[0] })
        );
        assert_eq!(
            ring.resolve_target(nodes[0]),
            Err(RingError::RaceOnWithdrawnTarget { node: nodes[0] })
        );
        assert_eq!(
            ring.withdraw(nodes[0]),
            Err(RingError::RaceOnWithdrawnTarget { node: nodes[0] })
        );
        assert_eq!(
            ring.resolve_target(NodeId(42)),
            Err(RingError::UnknownNode { node: NodeId(42) })
        );
        assert_eq!(ring.retired_nodes(), vec![nodes[0]]);
    }

    #[test]
    fn test_walk_from_any_node() {
        let nodes = make_nodes(5);
        let mut ring = RingTopology::from_order(&nodes).unwrap();
        ring.withdraw(nodes[2]).unwrap();

        let walk = ring.walk_from(nodes[3]).unwrap();
        assert_eq!(walk, vec![nodes[3], nodes[4], nodes[0], nodes[1]]);
    }

    proptest! {
        /// Any removal order keeps a single cycle over the survivors.
        #[test]
        fn prop_cycle_integrity_under_any_removal_order(
            (n, order) in (1u32..24).prop_flat_map(|n| {
                (Just(n), Just((0..n).map(NodeId).collect::<Vec<_>>()).prop_shuffle())
            })
        ) {
            let nodes = make_nodes(n);
            let mut ring = RingTopology::from_order(&nodes).unwrap();

            for (removed, &id) in order.iter().enumerate() {
                let before = ring.live_count();
                let relink = ring.withdraw(id).unwrap();
                ring.check_invariants().unwrap();

                if before == 1 {
                    prop_assert!(relink.is_none());
                    prop_assert!(ring.is_live(id));
                } else {
                    let relink = relink.unwrap();
                    prop_assert_eq!(ring.live_count(), before - 1);
                    prop_assert_eq!(ring.successor(relink.predecessor), Ok(relink.successor));
                    prop_assert_eq!(ring.predecessor(relink.successor), Ok(relink.predecessor));
                    prop_assert_eq!(ring.live_count(), n as usize - removed - 1);
                }

                for live in ring.live_nodes() {
                    let walk = ring.walk_from(live).unwrap();
                    prop_assert_eq!(walk.len(), ring.live_count());
                    prop_assert!(!walk.contains(&id) || ring.is_live(id));
                }
            }

            prop_assert_eq!(ring.live_count(), 1);
        }
    }
}
