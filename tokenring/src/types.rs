//! Identities and the envelope circulated around the ring.

use core::fmt;

use crate::error::ProtocolViolation;

/// Stable identity of a ring participant.
///
/// Identities are never reused: a withdrawn node keeps its id, and the ring
/// resolves it to "not live" from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The unit of circulation.
///
/// `sender` and `receiver` are fixed at creation. The acknowledgment flag can
/// only move from false to true, and only at the hands of the receiver; both
/// rules are enforced here rather than trusted to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope {
    sender: NodeId,
    receiver: NodeId,
    seq: u32,
    last_forwarder: NodeId,
    acknowledged: bool,
    hops: u32,
}

impl Envelope {
    /// Create a fresh, unacknowledged envelope held by its sender.
    pub fn create(sender: NodeId, receiver: NodeId, seq: u32) -> Self {
        Self {
            sender,
            receiver,
            seq,
            last_forwarder: sender,
            acknowledged: false,
            hops: 0,
        }
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn receiver(&self) -> NodeId {
        self.receiver
    }

    /// Per-sender sequence number; `(sender, seq)` identifies the envelope.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn last_forwarder(&self) -> NodeId {
        self.last_forwarder
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Number of times the envelope has been handed to a successor.
    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// Record that `by` is handing the envelope onward.
    pub fn mark_forwarded(&mut self, by: NodeId) {
        self.last_forwarder = by;
        self.hops = self.hops.saturating_add(1);
    }

    /// Flip the acknowledgment flag on behalf of `by`.
    ///
    /// Fails without touching the envelope if it is already acknowledged or
    /// `by` is not the receiver.
    pub fn mark_acknowledged(&mut self, by: NodeId) -> Result<(), ProtocolViolation> {
        if self.acknowledged {
            return Err(ProtocolViolation::DoubleAcknowledgment {
                sender: self.sender,
                receiver: self.receiver,
                seq: self.seq,
            });
        }
        if by != self.receiver {
            return Err(ProtocolViolation::NotReceiver {
                by,
                sender: self.sender,
                receiver: self.receiver,
                seq: self.seq,
            });
        }
        self.acknowledged = true;
        self.last_forwarder = by;
        Ok(())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}->{}{}",
            self.sender,
            self.seq,
            self.receiver,
            if self.acknowledged { " (ack)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_conversions() {
        const SEVEN: NodeId = NodeId::new(7);
        assert_eq!(SEVEN.value(), 7);
        assert_eq!(NodeId::from(7), SEVEN);
        assert_eq!(SEVEN.to_string(), "node7");
    }

    #[test]
    fn test_create() {
        let env = Envelope::create(NodeId(0), NodeId(2), 7);
        assert_eq!(env.sender(), NodeId(0));
        assert_eq!(env.receiver(), NodeId(2));
        assert_eq!(env.last_forwarder(), NodeId(0));
        assert_eq!(env.seq(), 7);
        assert_eq!(env.hops(), 0);
        assert!(!env.is_acknowledged());
    }

    #[test]
    fn test_mark_forwarded_ignores_ack_state() {
        let mut env = Envelope::create(NodeId(0), NodeId(2), 0);
        env.mark_forwarded(NodeId(1));
        assert_eq!(env.last_forwarder(), NodeId(1));

        env.mark_acknowledged(NodeId(2)).unwrap();
        env.mark_forwarded(NodeId(3));
        assert_eq!(env.last_forwarder(), NodeId(3));
        assert_eq!(env.hops(), 2);
        assert!(env.is_acknowledged());
    }

    #[test]
    fn test_acknowledge_once() {
        let mut env = Envelope::create(NodeId(0), NodeId(2), 3);
        env.mark_acknowledged(NodeId(2)).unwrap();
        assert!(env.is_acknowledged());
        assert_eq!(env.last_forwarder(), NodeId(2));

        let err = env.mark_acknowledged(NodeId(2)).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::DoubleAcknowledgment {
                sender: NodeId(0),
                receiver: NodeId(2),
                seq: 3,
            }
        );
        // Still acknowledged, never reverts
        assert!(env.is_acknowledged());
    }

    #[test]
    fn test_only_receiver_acknowledges() {
        let mut env = Envelope::create(NodeId(0), NodeId(2), 0);
        let err = env.mark_acknowledged(NodeId(1)).unwrap_err();
        assert!(matches!(err, ProtocolViolation::NotReceiver { by: NodeId(1), .. }));
        assert!(!env.is_acknowledged());
        assert_eq!(env.last_forwarder(), NodeId(0));
    }

    #[test]
    fn test_display() {
        let mut env = Envelope::create(NodeId(1), NodeId(3), 4);
        assert_eq!(env.to_string(), "node1#4->node3");
        env.mark_acknowledged(NodeId(3)).unwrap();
        assert_eq!(env.to_string(), "node1#4->node3 (ack)");
    }
}
