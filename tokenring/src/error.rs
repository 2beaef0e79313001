//! Error types for the ring protocol.
//!
//! Nothing here is fatal to a run. Routing errors end in a local discard,
//! protocol violations are logged and counted, and configuration errors are
//! returned before the first event is processed.

use thiserror::Error;

use crate::types::NodeId;

/// Topology lookups and mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// The node's outgoing edge has no live successor.
    #[error("{from} has no live successor")]
    DisconnectedRoute { from: NodeId },

    /// The identity was part of the ring but has withdrawn.
    #[error("{node} has already withdrawn")]
    RaceOnWithdrawnTarget { node: NodeId },

    /// The identity was never part of the ring.
    #[error("{node} is not part of the ring")]
    UnknownNode { node: NodeId },

    /// A structural invariant does not hold.
    #[error("ring invariant violated: {0}")]
    Corrupt(String),
}

impl RingError {
    /// Whether the envelope that hit this error should simply be dropped.
    pub fn is_discard(&self) -> bool {
        matches!(
            self,
            RingError::DisconnectedRoute { .. } | RingError::RaceOnWithdrawnTarget { .. }
        )
    }
}

/// Breaches of the envelope acknowledgment rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("envelope {sender}#{seq} for {receiver} is already acknowledged")]
    DoubleAcknowledgment {
        sender: NodeId,
        receiver: NodeId,
        seq: u32,
    },

    #[error("{by} tried to acknowledge envelope {sender}#{seq} addressed to {receiver}")]
    NotReceiver {
        by: NodeId,
        sender: NodeId,
        receiver: NodeId,
        seq: u32,
    },
}

/// Invalid construction input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a ring needs at least one node")]
    EmptyRing,

    #[error("{0} appears more than once")]
    DuplicateNode(NodeId),

    #[error("originator {0} has no target")]
    MissingTarget(NodeId),

    #[error("originator {0} targets itself")]
    SelfTarget(NodeId),

    #[error("{node} targets {target}, which is not in the ring")]
    UnknownTarget { node: NodeId, target: NodeId },

    #[error("send interval must be non-zero")]
    ZeroSendInterval,

    #[error("successor table is not a single cycle: {0}")]
    NotASingleCycle(String),

    #[error("expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("node index {index} out of range for a ring of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{0} has settings but is not a live member of the ring")]
    NotInRing(NodeId),
}

/// Result type for topology operations.
pub type RingResult<T> = Result<T, RingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_classification() {
        assert!(RingError::DisconnectedRoute { from: NodeId(1) }.is_discard());
        assert!(RingError::RaceOnWithdrawnTarget { node: NodeId(1) }.is_discard());
        assert!(!RingError::UnknownNode { node: NodeId(1) }.is_discard());
        assert!(!RingError::Corrupt("x".into()).is_discard());
    }

    #[test]
    fn test_messages_name_the_nodes() {
        let err = ProtocolViolation::DoubleAcknowledgment {
            sender: NodeId(0),
            receiver: NodeId(2),
            seq: 1,
        };
        assert_eq!(
            err.to_string(),
            "envelope node0#1 for node2 is already acknowledged"
        );
        assert_eq!(
            ConfigError::UnknownTarget {
                node: NodeId(1),
                target: NodeId(9)
            }
            .to_string(),
            "node1 targets node9, which is not in the ring"
        );
    }
}
