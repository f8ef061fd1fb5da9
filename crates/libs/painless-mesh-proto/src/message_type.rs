//! Message type discriminants and their reserved ranges.

use serde::{Deserialize, Serialize};

/// A 16-bit message type tag. See the reserved ranges below; everything
/// else (200-299 user domain, and anything not otherwise claimed) parses
/// as an opaque, still-forwardable envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u16);

impl MessageType {
    // Internal (1-9)
    pub const SYNC: MessageType = MessageType(1);
    pub const ACK: MessageType = MessageType(2);
    pub const SINGLE: MessageType = MessageType(3);
    pub const BROADCAST: MessageType = MessageType(4);
    pub const NODE_SYNC_REQUEST: MessageType = MessageType(5);
    pub const NODE_SYNC_REPLY: MessageType = MessageType(6);
    pub const TIME_SYNC: MessageType = MessageType(7);
    pub const OTA: MessageType = MessageType(8);
    pub const TIME_DELAY: MessageType = MessageType(9);

    // Bridge / time-sync extensions (610-699)
    pub const BRIDGE_STATUS: MessageType = MessageType(610);
    pub const BRIDGE_ELECTION: MessageType = MessageType(611);
    pub const BRIDGE_TAKEOVER: MessageType = MessageType(612);
    pub const NTP_TIME_SYNC: MessageType = MessageType(614);

    // Gateway (700-799)
    pub const GATEWAY_DATA: MessageType = MessageType(700);
    pub const GATEWAY_ACK: MessageType = MessageType(701);

    pub const USER_DOMAIN_START: u16 = 200;
    pub const USER_DOMAIN_END: u16 = 299;
    pub const BRIDGE_DOMAIN_START: u16 = 600;
    pub const BRIDGE_DOMAIN_END: u16 = 699;
    pub const GATEWAY_DOMAIN_START: u16 = 700;
    pub const GATEWAY_DOMAIN_END: u16 = 799;

    pub fn is_user_domain(self) -> bool {
        (Self::USER_DOMAIN_START..=Self::USER_DOMAIN_END).contains(&self.0)
    }

    pub fn is_internal(self) -> bool {
        (1..=9).contains(&self.0)
    }

    pub fn is_bridge_domain(self) -> bool {
        (Self::BRIDGE_DOMAIN_START..=Self::BRIDGE_DOMAIN_END).contains(&self.0)
    }

    pub fn is_gateway_domain(self) -> bool {
        (Self::GATEWAY_DOMAIN_START..=Self::GATEWAY_DOMAIN_END).contains(&self.0)
    }

    /// Routing implied by the reserved protocol types; user/unknown types
    /// must carry their own `routing` field on the wire.
    pub fn default_routing(self) -> Option<crate::Routing> {
        use crate::Routing;
        match self {
            Self::SINGLE => Some(Routing::Single),
            Self::BROADCAST => Some(Routing::Broadcast),
            Self::NODE_SYNC_REQUEST
            | Self::NODE_SYNC_REPLY
            | Self::TIME_SYNC
            | Self::TIME_DELAY => Some(Routing::Neighbor),
            Self::BRIDGE_STATUS
            | Self::BRIDGE_ELECTION
            | Self::BRIDGE_TAKEOVER
            | Self::NTP_TIME_SYNC => Some(Routing::Broadcast),
            Self::GATEWAY_DATA | Self::GATEWAY_ACK => Some(Routing::Single),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        MessageType(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_classify_correctly() {
        assert!(MessageType::SINGLE.is_internal());
        assert!(MessageType(250).is_user_domain());
        assert!(MessageType::BRIDGE_STATUS.is_bridge_domain());
        assert!(MessageType::GATEWAY_DATA.is_gateway_domain());
    }

    #[test]
    fn default_routing_matches_spec_table() {
        use crate::Routing;
        assert_eq!(MessageType::SINGLE.default_routing(), Some(Routing::Single));
        assert_eq!(MessageType::BROADCAST.default_routing(), Some(Routing::Broadcast));
        assert_eq!(MessageType::NODE_SYNC_REQUEST.default_routing(), Some(Routing::Neighbor));
        assert_eq!(MessageType::BRIDGE_ELECTION.default_routing(), Some(Routing::Broadcast));
        assert_eq!(MessageType::GATEWAY_ACK.default_routing(), Some(Routing::Single));
        assert_eq!(MessageType(250).default_routing(), None);
    }
}
