#![forbid(unsafe_code)]
//! tokenring - Self-reconfiguring ring of budgeted nodes.
//!
//! Nodes pass envelopes around a directed cycle. An originator addresses an
//! envelope to a target; the target acknowledges it and the acknowledgment
//! keeps travelling until it returns to the originator. Every originate or
//! relay costs the acting node one unit of budget. A node whose budget runs
//! out leaves the ring and its predecessor is linked straight to its
//! successor, so the survivors always form a single cycle.
//!
//! # Key Properties
//!
//! - One cycle: following successors from any live node visits every live
//!   node exactly once
//! - Budgets only go down, by one per originate or relay; acknowledging is free
//! - An envelope is acknowledged at most once, and only by its receiver
//! - A lone node never withdraws and never forwards
//!
//! # Example
//!
//! ```
//! use tokenring::{NodeId, RingTopology};
//!
//! let ids: Vec<NodeId> = (0..4).map(NodeId).collect();
//! let mut ring = RingTopology::from_order(&ids).unwrap();
//!
//! // node1 leaves: node0 now points straight at node2
//! let relink = ring.withdraw(NodeId(1)).unwrap().unwrap();
//! assert_eq!(relink.predecessor, NodeId(0));
//! assert_eq!(relink.successor, NodeId(2));
//! assert_eq!(ring.successor(NodeId(0)), Ok(NodeId(2)));
//! assert_eq!(ring.live_count(), 3);
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - NodeId and the Envelope
//! - [`ring`] - RingTopology and the withdrawal/relink algorithm
//! - [`node`] - Per-node state machine
//! - [`traits`] - The Scheduler seam the driver implements
//! - [`config`] - Construction-time settings and validation
//! - [`error`] - Error taxonomy
//! - [`time`] - Timestamp and Duration types

// Prevent mock schedulers from leaking into release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It exposes mock schedulers intended only for tests."
);

pub mod config;
pub mod error;
pub mod node;
pub mod ring;
pub mod time;
pub mod traits;
pub mod types;

pub use config::{NodeSpec, RingConfig, DEFAULT_LINK_DELAY, DEFAULT_SEND_INTERVAL};
pub use error::{ConfigError, ProtocolViolation, RingError, RingResult};
pub use node::{DiscardReason, Node, NodeState, NodeStats, Outcome, Transition};
pub use ring::{Adjacency, Relink, RingTopology};
pub use time::{Duration, Timestamp};
pub use traits::{Scheduler, TimerHandle};
pub use types::{Envelope, NodeId};
