//! Bridge role management and RSSI-based election (spec §4.L).
//!
//! Any node with usable station RSSI to the upstream AP can act as the
//! mesh's single internet-facing bridge. At most one bridge should be
//! active at a time; when two claim the role simultaneously, an election
//! resolves it by comparing RSSI, then uptime, then free memory, then
//! node id, in that order, each only consulted if the previous tiebreak
//! was exactly equal.

use std::net::Ipv4Addr;
use std::time::Duration;

use painless_mesh_proto::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRole {
    Regular,
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub node_id: NodeId,
    pub rssi: i8,
    pub uptime_millis: u64,
    pub free_memory_bytes: u32,
    pub internet_connected: bool,
    pub router_channel: u8,
    pub gateway_ip: Option<Ipv4Addr>,
}

impl BridgeStatus {
    /// Ordering key for election: higher is "more fit to be bridge".
    /// Compares RSSI first (closer to 0 is a stronger signal, so higher
    /// RSSI wins), then uptime, then free memory, then — only to break an
    /// otherwise complete tie — the lower node id wins, for determinism.
    fn beats(&self, other: &BridgeStatus) -> bool {
        if self.rssi != other.rssi {
            return self.rssi > other.rssi;
        }
        if self.uptime_millis != other.uptime_millis {
            return self.uptime_millis > other.uptime_millis;
        }
        if self.free_memory_bytes != other.free_memory_bytes {
            return self.free_memory_bytes > other.free_memory_bytes;
        }
        self.node_id < other.node_id
    }
}

/// A bridge candidate's last-advertised [`BridgeStatus`] plus when it was
/// last heard from — the latter is local bookkeeping, not part of the wire
/// message, so it lives here rather than on `BridgeStatus` itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeInfo {
    pub status: BridgeStatus,
    pub last_seen_millis: u64,
}

/// An in-progress BRIDGE_ELECTION (spec §4.L): started on a topology change
/// or periodic timeout while this node holds no bridge, collects candidate
/// `BridgeStatus` replies until `election_timeout` elapses.
struct Election {
    started_millis: u64,
    self_status: BridgeStatus,
    candidates: Vec<BridgeStatus>,
}

pub struct BridgeManager {
    role: BridgeRole,
    last_role_change_millis: u64,
    last_status_broadcast_millis: u64,
    known_bridges: Vec<BridgeInfo>,
    election: Option<Election>,
}

impl Default for BridgeManager {
    fn default() -> Self {
        BridgeManager {
            role: BridgeRole::Regular,
            last_role_change_millis: 0,
            last_status_broadcast_millis: 0,
            known_bridges: Vec::new(),
            election: None,
        }
    }
}

impl BridgeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }

    /// Records a BRIDGE_STATUS heard from some node (possibly ourselves).
    /// Stale entries for the same node id are replaced. Also feeds a
    /// running election's candidate list, if one is in progress.
    pub fn observe_status(&mut self, status: BridgeStatus, now_millis: u64) {
        self.known_bridges.retain(|b| b.status.node_id != status.node_id);
        self.known_bridges.push(BridgeInfo { status, last_seen_millis: now_millis });

        if let Some(election) = &mut self.election {
            election.candidates.retain(|c| c.node_id != status.node_id);
            election.candidates.push(status);
        }
    }

    pub fn forget(&mut self, node_id: NodeId) {
        self.known_bridges.retain(|b| b.status.node_id != node_id);
    }

    pub fn known_bridge_count(&self) -> usize {
        self.known_bridges.len()
    }

    /// Every bridge candidate this node currently knows about, for
    /// exposing to the embedding application (spec §4.L's `getBridges`).
    pub fn get_bridges(&self) -> &[BridgeInfo] {
        &self.known_bridges
    }

    /// Drops bridge entries not heard from within `bridge_timeout`,
    /// returning the node ids evicted (spec §4.L: BRIDGE_TIMEOUT).
    pub fn evict_stale(&mut self, now_millis: u64, bridge_timeout: Duration) -> Vec<NodeId> {
        let cutoff = bridge_timeout.as_millis() as u64;
        let (fresh, stale): (Vec<_>, Vec<_>) =
            self.known_bridges.drain(..).partition(|b| now_millis.saturating_sub(b.last_seen_millis) < cutoff);
        self.known_bridges = fresh;
        stale.into_iter().map(|b| b.status.node_id).collect()
    }

    /// The current best bridge candidate among everyone known plus
    /// `self_status`, or `None` if `min_bridge_rssi` excludes every
    /// candidate including ourselves (spec §4.L's `getPrimaryBridge`).
    pub fn get_primary_bridge(&self, self_status: &BridgeStatus, min_bridge_rssi: i8) -> Option<BridgeStatus> {
        elect_among(self_status, self.known_bridges.iter().map(|b| &b.status), min_bridge_rssi).copied()
    }

    /// Starts collecting BRIDGE_ELECTION replies. A second call while one
    /// is already in progress is ignored — the caller checks
    /// [`BridgeManager::election_in_progress`] first.
    pub fn start_election(&mut self, now_millis: u64, self_status: BridgeStatus) {
        if self.election.is_none() {
            self.election = Some(Election { started_millis: now_millis, self_status, candidates: Vec::new() });
        }
    }

    pub fn election_in_progress(&self) -> bool {
        self.election.is_some()
    }

    pub fn election_due(&self, now_millis: u64, election_timeout: Duration) -> bool {
        match &self.election {
            Some(election) => now_millis.saturating_sub(election.started_millis) >= election_timeout.as_millis() as u64,
            None => false,
        }
    }

    /// Resolves a completed election, returning the winner. `None` only if
    /// no election was in progress.
    pub fn finish_election(&mut self, min_bridge_rssi: i8) -> Option<BridgeStatus> {
        let election = self.election.take()?;
        elect_among(&election.self_status, election.candidates.iter(), min_bridge_rssi).copied()
    }

    /// Whether this node may change bridge role right now, respecting the
    /// minimum interval between role changes (spec §4.L: avoids flapping).
    pub fn can_change_role(&self, now_millis: u64, min_role_change_interval: Duration) -> bool {
        now_millis.saturating_sub(self.last_role_change_millis) >= min_role_change_interval.as_millis() as u64
    }

    pub fn set_role(&mut self, role: BridgeRole, now_millis: u64) {
        self.role = role;
        self.last_role_change_millis = now_millis;
    }

    pub fn status_broadcast_due(&self, now_millis: u64, interval: Duration) -> bool {
        now_millis.saturating_sub(self.last_status_broadcast_millis) >= interval.as_millis() as u64
    }

    pub fn mark_status_broadcast(&mut self, now_millis: u64) {
        self.last_status_broadcast_millis = now_millis;
    }

    /// Whether a just-observed topology change (spec §4.L: "on topology
    /// change once routing is stable") should additionally trigger a
    /// status broadcast, deferred while scans are still turning up new
    /// peers (`election_defer_empty_scan_threshold`).
    pub fn should_announce_on_topology_change(&self, consecutive_empty_scans: u32, defer_threshold: u32) -> bool {
        consecutive_empty_scans >= defer_threshold
    }
}

/// Runs an election among `self_status` plus every candidate in `others`,
/// returning whichever wins under [`BridgeStatus::beats`].
fn elect_among<'a>(
    self_status: &'a BridgeStatus,
    others: impl Iterator<Item = &'a BridgeStatus>,
    min_bridge_rssi: i8,
) -> Option<&'a BridgeStatus> {
    std::iter::once(self_status)
        .chain(others)
        .filter(|b| b.rssi >= min_bridge_rssi)
        .reduce(|best, candidate| if candidate.beats(best) { candidate } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(node: u32, rssi: i8, uptime: u64, mem: u32) -> BridgeStatus {
        BridgeStatus {
            node_id: NodeId(node),
            rssi,
            uptime_millis: uptime,
            free_memory_bytes: mem,
            internet_connected: true,
            router_channel: 6,
            gateway_ip: None,
        }
    }

    #[test]
    fn election_prefers_strongest_rssi() {
        let mut mgr = BridgeManager::new();
        mgr.observe_status(status(2, -60, 1000, 1000), 0);
        let me = status(1, -40, 500, 500);
        let winner = mgr.get_primary_bridge(&me, -80).unwrap();
        assert_eq!(winner.node_id, NodeId(1));
    }

    #[test]
    fn election_falls_through_tiebreaks_in_order() {
        let mut mgr = BridgeManager::new();
        // Same RSSI as self, longer uptime -> wins on uptime.
        mgr.observe_status(status(2, -50, 9000, 100), 0);
        let me = status(1, -50, 1000, 9999);
        let winner = mgr.get_primary_bridge(&me, -80).unwrap();
        assert_eq!(winner.node_id, NodeId(2));
    }

    #[test]
    fn election_excludes_candidates_below_min_rssi() {
        let mut mgr = BridgeManager::new();
        mgr.observe_status(status(2, -90, 9000, 9000), 0);
        let me = status(1, -85, 100, 100);
        let winner = mgr.get_primary_bridge(&me, -80).unwrap();
        assert_eq!(winner.node_id, NodeId(1)); // candidate 2 excluded below threshold
    }

    #[test]
    fn a_complete_tie_breaks_on_lower_node_id() {
        let mut mgr = BridgeManager::new();
        mgr.observe_status(status(5, -50, 1000, 1000), 0);
        let me = status(3, -50, 1000, 1000);
        let winner = mgr.get_primary_bridge(&me, -80).unwrap();
        assert_eq!(winner.node_id, NodeId(3));
    }

    #[test]
    fn role_change_respects_minimum_interval() {
        let mut mgr = BridgeManager::new();
        mgr.set_role(BridgeRole::Bridge, 0);
        assert!(!mgr.can_change_role(30_000, Duration::from_secs(60)));
        assert!(mgr.can_change_role(60_000, Duration::from_secs(60)));
    }

    #[test]
    fn stale_bridges_are_evicted_after_timeout() {
        let mut mgr = BridgeManager::new();
        mgr.observe_status(status(2, -60, 1000, 1000), 1_000);
        assert!(mgr.evict_stale(2_000, Duration::from_secs(30)).is_empty());
        let evicted = mgr.evict_stale(40_000, Duration::from_secs(30));
        assert_eq!(evicted, vec![NodeId(2)]);
        assert_eq!(mgr.known_bridge_count(), 0);
    }

    #[test]
    fn an_election_collects_replies_and_resolves_the_strongest() {
        let mut mgr = BridgeManager::new();
        let me = status(1, -70, 100, 100);
        assert!(!mgr.election_in_progress());
        mgr.start_election(0, me);
        assert!(mgr.election_in_progress());
        assert!(!mgr.election_due(1_000, Duration::from_secs(5)));

        mgr.observe_status(status(2, -40, 50, 50), 500);
        assert!(mgr.election_due(5_000, Duration::from_secs(5)));

        let winner = mgr.finish_election(-80).unwrap();
        assert_eq!(winner.node_id, NodeId(2));
        assert!(!mgr.election_in_progress());
    }
}
