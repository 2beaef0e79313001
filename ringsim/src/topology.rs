//! Static multi-gate topology for the random-walk variant.
//!
//! Unlike [`RingTopology`](tokenring::RingTopology) this graph never changes
//! shape on its own: a node's gates are its undirected links, and a gate can
//! only be switched off explicitly.

use hashbrown::HashMap;
use tokenring::NodeId;

/// A gate between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Whether the gate currently carries messages.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self { active: true }
    }
}

impl Link {
    /// Create a new link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the link is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Undirected graph of gates between nodes.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Links between pairs of nodes, keyed by canonical pair.
    links: HashMap<(NodeId, NodeId), Link>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fully connected topology for the given nodes.
    pub fn fully_connected(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Create a chain topology (each node connected only to neighbors).
    pub fn chain(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// Create a chain whose ends are joined.
    ///
    /// Fewer than three nodes degenerate to a chain.
    pub fn ring(nodes: &[NodeId]) -> Self {
        let mut topo = Self::chain(nodes);
        if nodes.len() > 2 {
            topo.add_link(nodes[nodes.len() - 1], nodes[0], Link::default());
        }
        topo
    }

    /// Create a star topology (first node is hub, connected to all others).
    pub fn star(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        if nodes.is_empty() {
            return topo;
        }
        let hub = nodes[0];
        for &spoke in nodes.iter().skip(1) {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Add a bidirectional link between two nodes. Self-links are ignored.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        if a == b {
            return;
        }
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    /// Get a link between two nodes.
    pub fn get_link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    /// Get a mutable link between two nodes.
    pub fn get_link_mut(&mut self, a: NodeId, b: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Check if two nodes are connected (link exists and is active).
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable from `node` through an active gate, sorted by id.
    ///
    /// Sorting keeps seeded walks reproducible regardless of hash order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort();
        result
    }

    /// Number of links, active or not.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Canonical pair ordering for consistent link storage.
    fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
