//! Envelope routing discriminant.

use serde::{Deserialize, Serialize};

/// How an envelope should be propagated through the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Routing {
    Single = 0,
    Neighbor = 1,
    Broadcast = 2,
}

impl Routing {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Routing::Single),
            1 => Some(Routing::Neighbor),
            2 => Some(Routing::Broadcast),
            _ => None,
        }
    }
}
