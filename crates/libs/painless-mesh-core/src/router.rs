//! Next-hop selection and node-sync (spec §4.H).
//!
//! The router knows nothing about sockets: it is handed the local node's
//! view of the mesh (a [`NodeTree`] per neighbor connection) and decides,
//! for a given destination and [`Routing`] mode, which connection(s) a
//! message should go out on. [`Mesh`](crate::mesh::Mesh) owns the
//! connection arena and does the actual sending.

use std::collections::HashMap;
use std::time::Duration;

use painless_mesh_proto::{NodeId, NodeTree, Routing};

use crate::connection::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Send only on this one connection (SINGLE routing, or NEIGHBOR).
    One(ConnectionId),
    /// Send on every connection (BROADCAST, or SINGLE with no known route
    /// — painlessMesh floods rather than silently drops).
    All,
    /// No connection's subtree contains the destination and the message
    /// is not a broadcast; the caller should report `MeshError::Routing`.
    Unreachable,
}

/// Tracks each neighbor connection's subtree and computes forwarding
/// decisions and periodic resync timing.
#[derive(Default)]
pub struct Router {
    subtrees: HashMap<ConnectionId, NodeTree>,
    last_resync_millis: u64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the subtree known for `conn` (from a NODE_SYNC_REPLY or an
    /// unsolicited NODE_SYNC_REQUEST), returning whether it actually
    /// changed — callers use this to decide whether a resync broadcast and
    /// bridge-status update are due (spec §4.H, §4.L).
    pub fn update_subtree(&mut self, conn: ConnectionId, tree: NodeTree) -> bool {
        let changed = self.subtrees.get(&conn).map(|old| !old.equals_canonical(&tree)).unwrap_or(true);
        self.subtrees.insert(conn, tree);
        changed
    }

    pub fn remove_subtree(&mut self, conn: ConnectionId) -> bool {
        self.subtrees.remove(&conn).is_some()
    }

    pub fn subtree(&self, conn: ConnectionId) -> Option<&NodeTree> {
        self.subtrees.get(&conn)
    }

    /// Every currently-known connection id, for broadcast fan-out.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subtrees.keys().copied()
    }

    pub fn decide(&self, dest: NodeId, routing: Routing) -> ForwardDecision {
        match routing {
            Routing::Broadcast => ForwardDecision::All,
            // NEIGHBOR traffic (node-sync, time-sync) is single-hop only:
            // it goes to the one connection whose peer is `dest`, never
            // re-routed or flooded any further (spec §4.H).
            Routing::Neighbor => self
                .neighbor_connection(dest)
                .map(ForwardDecision::One)
                .unwrap_or(ForwardDecision::Unreachable),
            Routing::Single => self
                .next_hop_for(dest)
                .map(ForwardDecision::One)
                .unwrap_or(ForwardDecision::Unreachable),
        }
    }

    fn next_hop_for(&self, dest: NodeId) -> Option<ConnectionId> {
        self.subtrees.iter().find(|(_, tree)| tree.contains(dest)).map(|(conn, _)| *conn)
    }

    /// The connection directly adjacent to `dest`, i.e. the one whose
    /// reported subtree is rooted at `dest` itself.
    fn neighbor_connection(&self, dest: NodeId) -> Option<ConnectionId> {
        self.subtrees.iter().find(|(_, tree)| tree.node_id == dest).map(|(conn, _)| *conn)
    }

    /// Every currently-known direct neighbor's node id, for pushing
    /// per-neighbor NEIGHBOR-routed traffic (node-sync, time-sync)
    /// (spec §4.H/§4.I).
    pub fn neighbor_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.subtrees.values().map(|tree| tree.node_id)
    }

    pub fn hop_count_to(&self, local: NodeId, dest: NodeId) -> u8 {
        if local == dest {
            return 0;
        }
        self.subtrees
            .values()
            .filter_map(|tree| {
                if tree.contains(dest) {
                    Some(tree.hop_count(dest).saturating_add(1))
                } else {
                    None
                }
            })
            .min()
            .unwrap_or(painless_mesh_proto::UNREACHABLE_HOPS)
    }

    pub fn path_to(&self, local: NodeId, dest: NodeId) -> Vec<NodeId> {
        if local == dest {
            return vec![local];
        }
        for tree in self.subtrees.values() {
            if tree.contains(dest) {
                let mut path = vec![local];
                path.extend(tree.path_to(dest));
                return path;
            }
        }
        Vec::new()
    }

    /// Builds the local node's own subtree by grafting each connection's
    /// reported subtree under `local`, for replying to a NODE_SYNC_REQUEST
    /// or advertising via NODE_SYNC_REPLY.
    pub fn local_tree(&self, local: NodeId, is_root: bool) -> NodeTree {
        let mut tree = NodeTree::leaf(local);
        tree.root = is_root;
        tree.subs = self.subtrees.values().cloned().collect();
        tree.fix_contains_root();
        tree
    }

    /// Every node reachable through any connection, mapped to the
    /// connection it should be routed through (spec §4.H's routing table).
    pub fn routing_table(&self) -> HashMap<NodeId, ConnectionId> {
        let mut table = HashMap::new();
        for (conn, tree) in &self.subtrees {
            table.insert(tree.node_id, *conn);
            for child in &tree.subs {
                flatten_into(child, *conn, &mut table);
            }
        }
        table
    }

    /// Whether a periodic NODE_SYNC_REPLY broadcast is due, independent of
    /// any topology-change trigger (spec §4.H: "periodic, about once a
    /// minute, plus immediately on topology change").
    pub fn resync_due(&self, now_millis: u64, interval: Duration) -> bool {
        now_millis.saturating_sub(self.last_resync_millis) >= interval.as_millis() as u64
    }

    pub fn mark_resynced(&mut self, now_millis: u64) {
        self.last_resync_millis = now_millis;
    }
}

fn flatten_into(node: &NodeTree, conn: ConnectionId, table: &mut HashMap<NodeId, ConnectionId>) {
    table.insert(node.node_id, conn);
    for child in &node.subs {
        flatten_into(child, conn, table);
    }
}
