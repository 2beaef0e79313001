//! ringsim - Discrete event simulator for the self-reconfiguring token ring.
//!
//! This crate drives [`tokenring`] nodes deterministically, without real-time
//! delays, and records what happened.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Per-edge FIFO delivery**: Link delay may change mid-run without reordering an edge
//! - **Scenario builder**: Budgets, originators, forced withdrawals and injected envelopes by position
//! - **Metrics collection**: Transition counters, relinks, ring snapshots, optional delivery log
//! - **Static variants**: Counter ring and random walk over a fixed gate graph
//!
//! # Example
//!
//! ```
//! use ringsim::{Duration, ScenarioBuilder};
//!
//! // Node 0 addresses node 2 around a 4-node ring
//! let result = ScenarioBuilder::new(4)
//!     .with_budget(10)
//!     .originator(0, 2)
//!     .run_for(Duration::from_millis(1_500))
//!     .unwrap();
//!
//! // Sends at 0s and 1s, plus one a second after the first came back
//! assert_eq!(result.metrics.envelopes_originated, 3);
//! assert_eq!(result.metrics.round_trips, 2);
//! assert!(result.ring_intact());
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Drop it if it targets a node the ring no longer holds
//! 4. Otherwise call the node handler, which schedules follow-ups on the queue
//! 5. Fold the handler's outcome into the metrics
//!
//! Nodes never see the queue directly: it reaches them through the
//! [`tokenring::Scheduler`] trait.

pub mod event;
pub mod metrics;
pub mod scenario;
pub mod sim;
pub mod topology;
pub mod variants;

// Re-export main types
pub use event::{Event, EventQueue, ScenarioAction, ScheduledEvent};
pub use metrics::{RingSnapshot, SimMetrics, SimulationResult};
pub use scenario::{simple_scenario, ScenarioBuilder, DEFAULT_BUDGET};
pub use sim::{DeliveryRecord, Simulator};
pub use tokenring::{Duration, Envelope, NodeId, Relink, Timestamp};
pub use topology::{Link, Topology};
pub use variants::{CounterRing, CounterRunReport, RandomWalk, WalkReport};
