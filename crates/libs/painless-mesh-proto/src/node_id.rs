//! 32-bit mesh node identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a mesh node, derived from MAC or hardware ID on
/// real devices. `NodeId(0)` is reserved and means "no node" / "broadcast".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The reserved "none"/broadcast identifier.
    pub const NONE: NodeId = NodeId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_zero() {
        assert!(NodeId::NONE.is_none());
        assert!(NodeId(0).is_none());
        assert!(!NodeId(1).is_none());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let id = NodeId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: NodeId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}
