//! Error taxonomy (spec §7), grouped by *kind* rather than by call site.
//!
//! Nothing in this crate throws across the cooperative boundary: every
//! fallible operation returns a `Result<_, MeshError>` locally, updates
//! whatever state needs updating (closing a connection, dropping a
//! message), and the scheduler loop itself never aborts because of one bad
//! peer. See `Mesh::update()` for where these get logged and swallowed.

use painless_mesh_proto::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Bad JSON, oversized frame, missing terminator. The connection that
    /// produced this must close (spec §4.E/§4.F).
    #[error("framing error: {0}")]
    Framing(String),

    /// Unknown required field or a failed `Variant::to::<T>()` downcast.
    /// The offending message is dropped; nothing else happens.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No Established connection's subtree contains the destination.
    #[error("no route to node {0}")]
    Routing(NodeId),

    /// The underlying async I/O provider reported an error code.
    #[error("transport error on connection to {peer:?}: {message}")]
    Transport { peer: Option<NodeId>, message: String },

    /// No data received within `NODE_TIMEOUT`.
    #[error("node {0} timed out")]
    Timeout(NodeId),

    /// Gateway-context: WiFi not associated, or no DNS route. Always
    /// non-retryable per spec §4.M/§7.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Gateway-context: 5xx, 429, 203, connection reset. Retryable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Send buffer or offline queue over capacity; resolved by the
    /// caller's priority-eviction policy, this variant is informational.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Attempted send on a Closed connection.
    #[error("lifecycle misuse: {0}")]
    LifecycleMisuse(String),
}

impl MeshError {
    /// The two well-known gateway connectivity phrases from spec §4.M,
    /// which are always non-retryable regardless of the numeric HTTP
    /// status that accompanied them (testable property 6 in spec §8).
    pub const GATEWAY_WIFI_DOWN: &'static str = "Gateway WiFi not connected";
    pub const GATEWAY_NO_INTERNET: &'static str =
        "Router has no internet access - check WAN connection";

    pub fn is_retryable(&self) -> bool {
        match self {
            MeshError::Transient(_) => true,
            MeshError::Infrastructure(_) => false,
            MeshError::Transport { .. } | MeshError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_never_retryable() {
        let err = MeshError::Infrastructure(MeshError::GATEWAY_NO_INTERNET.to_string());
        assert!(!err.is_retryable());
        let err = MeshError::Infrastructure(MeshError::GATEWAY_WIFI_DOWN.to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(MeshError::Transient("HTTP 503".into()).is_retryable());
    }
}
