//! Construction-time configuration.
//!
//! Everything here is supplied once, validated once, and then treated as
//! immutable input by the protocol. Per-node settings live in [`NodeSpec`];
//! ring-wide timing lives in [`RingConfig`].

use hashbrown::HashSet;

use crate::error::ConfigError;
use crate::time::Duration;
use crate::types::NodeId;

/// Default gap between an originator's sends (one simulated second).
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-hop latency.
pub const DEFAULT_LINK_DELAY: Duration = Duration::from_millis(100);

/// Initial settings for one ring participant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeSpec {
    pub id: NodeId,
    /// Display name used in trace lines.
    pub name: String,
    /// Hops this node may perform before it must withdraw.
    pub budget: u32,
    /// Whether the node creates envelopes on its own timer.
    pub is_originator: bool,
    /// Destination for envelopes this node originates.
    pub target: Option<NodeId>,
}

impl NodeSpec {
    /// A relay-only node named after its id.
    pub fn new(id: NodeId, budget: u32) -> Self {
        Self {
            id,
            name: id.to_string(),
            budget,
            is_originator: false,
            target: None,
        }
    }

    /// Make this node an originator addressing `target`.
    pub fn originating_to(mut self, target: NodeId) -> Self {
        self.is_originator = true;
        self.target = Some(target);
        self
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Ring-wide timing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RingConfig {
    /// Delay before an originator's next timer.
    pub send_interval: Duration,
    /// Offset from the start of the run at which originators first fire.
    pub first_send_at: Duration,
    /// Latency of a single hop.
    pub link_delay: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            send_interval: DEFAULT_SEND_INTERVAL,
            first_send_at: Duration::ZERO,
            link_delay: DEFAULT_LINK_DELAY,
        }
    }
}

impl RingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub fn with_first_send_at(mut self, offset: Duration) -> Self {
        self.first_send_at = offset;
        self
    }

    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        self.link_delay = delay;
        self
    }

    /// Check the timing and a node set against each other.
    pub fn validate_nodes(&self, nodes: &[NodeSpec]) -> Result<(), ConfigError> {
        if self.send_interval.is_zero() {
            return Err(ConfigError::ZeroSendInterval);
        }
        if nodes.is_empty() {
            return Err(ConfigError::EmptyRing);
        }

        let mut ids = HashSet::with_capacity(nodes.len());
        for spec in nodes {
            if !ids.insert(spec.id) {
                return Err(ConfigError::DuplicateNode(spec.id));
            }
        }

        for spec in nodes.iter().filter(|s| s.is_originator) {
            let target = spec.target.ok_or(ConfigError::MissingTarget(spec.id))?;
            if target == spec.id {
                return Err(ConfigError::SelfTarget(spec.id));
            }
            if !ids.contains(&target) {
                return Err(ConfigError::UnknownTarget {
                    node: spec.id,
                    target,
                });
            }
        }

        Ok(())
    }
}
