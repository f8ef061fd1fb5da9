//! Station-mode scan/connect state machine (spec §4.J).
//!
//! Decides which AP to associate with (when several mesh peers are
//! visible) and tracks the reconnect backoff and channel auto-detect
//! flow. The actual radio calls go through [`crate::iface::WifiDriver`];
//! this module is pure decision logic so it is testable without one.

use std::time::Duration;

use painless_mesh_proto::NodeId;

use crate::iface::AccessPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Scanning,
    Connecting,
    Connected,
    /// Waiting for the node's own AP channel to be decided from a peer
    /// (this node hasn't picked a channel to broadcast on yet).
    WaitingForChannel,
    /// A channel mismatch was detected; realigning this node's AP to the
    /// mesh's established channel.
    ChannelResyncing,
}

/// An AP whose SSID identifies it as a mesh peer, alongside whether this
/// node's own subtree already contains the peer it advertises — used to
/// avoid forming a routing loop by connecting back into one's own subtree.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ap: AccessPoint,
    pub advertised_node_id: NodeId,
    pub would_form_loop: bool,
}

/// Drives AP selection, empty-scan tracking, and reconnect backoff.
/// Holds no I/O; callers feed in scan results and read back decisions.
pub struct StationScan {
    state: StationState,
    consecutive_empty_scans: u32,
    reconnect_attempts: u32,
}

impl Default for StationScan {
    fn default() -> Self {
        StationScan { state: StationState::Scanning, consecutive_empty_scans: 0, reconnect_attempts: 0 }
    }
}

impl StationScan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn set_state(&mut self, state: StationState) {
        self.state = state;
    }

    /// Picks the best candidate to connect to: never one that would form
    /// a routing loop, then highest RSSI among the rest. `None` means keep
    /// scanning.
    pub fn select<'a>(&mut self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        let best = candidates
            .iter()
            .filter(|c| !c.would_form_loop)
            .max_by_key(|c| c.ap.rssi);

        if best.is_none() {
            self.consecutive_empty_scans += 1;
        } else {
            self.consecutive_empty_scans = 0;
        }
        best
    }

    pub fn consecutive_empty_scans(&self) -> u32 {
        self.consecutive_empty_scans
    }

    /// Whether enough consecutive empty scans have elapsed that this node
    /// should force a channel resync rather than keep scanning its current
    /// channel (spec §4.J).
    pub fn empty_scan_resync_due(&self, threshold: u32) -> bool {
        self.consecutive_empty_scans >= threshold
    }

    pub fn reset_empty_scans(&mut self) {
        self.consecutive_empty_scans = 0;
    }

    /// Exponential reconnect backoff: `base * 2^attempts`, capped, with the
    /// attempt counter itself capped so backoff does not grow forever.
    pub fn next_reconnect_delay(&mut self, base: Duration, cap: Duration, attempt_cap: u32) -> Duration {
        let attempts = self.reconnect_attempts.min(attempt_cap);
        let delay = base.checked_mul(1u32 << attempts).unwrap_or(cap).min(cap);
        if self.reconnect_attempts < attempt_cap {
            self.reconnect_attempts += 1;
        }
        delay
    }

    pub fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap(ssid: &str, rssi: i8) -> AccessPoint {
        AccessPoint { ssid: ssid.to_string(), bssid: [0; 6], rssi, channel: 6, hidden: false }
    }

    #[test]
    fn selects_highest_rssi_among_non_looping_candidates() {
        let mut scan = StationScan::new();
        let candidates = vec![
            Candidate { ap: ap("mesh-a", -70), advertised_node_id: NodeId(2), would_form_loop: false },
            Candidate { ap: ap("mesh-b", -40), advertised_node_id: NodeId(3), would_form_loop: false },
            Candidate { ap: ap("mesh-c", -10), advertised_node_id: NodeId(4), would_form_loop: true },
        ];
        let picked = scan.select(&candidates).unwrap();
        assert_eq!(picked.advertised_node_id, NodeId(3));
    }

    #[test]
    fn empty_scan_counter_tracks_consecutive_misses_and_resets_on_a_hit() {
        let mut scan = StationScan::new();
        let looping_only =
            vec![Candidate { ap: ap("mesh-a", -40), advertised_node_id: NodeId(2), would_form_loop: true }];
        assert!(scan.select(&looping_only).is_none());
        assert!(scan.select(&looping_only).is_none());
        assert_eq!(scan.consecutive_empty_scans(), 2);
        assert!(!scan.empty_scan_resync_due(6));

        let good = vec![Candidate { ap: ap("mesh-b", -40), advertised_node_id: NodeId(3), would_form_loop: false }];
        assert!(scan.select(&good).is_some());
        assert_eq!(scan.consecutive_empty_scans(), 0);
    }

    #[test]
    fn reconnect_backoff_doubles_and_caps() {
        let mut scan = StationScan::new();
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(16);
        let delays: Vec<Duration> = (0..8).map(|_| scan.next_reconnect_delay(base, cap, 6)).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[4], Duration::from_secs(16));
        assert_eq!(delays[7], Duration::from_secs(16));
    }
}
