//! `NodeTree`: a peer's recursive view of everything reachable through it.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node_id::NodeId;

/// Distance returned by `hop_count` for a target not present in the tree.
pub const UNREACHABLE_HOPS: u8 = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeTreeError {
    #[error("node tree JSON malformed: {0}")]
    Malformed(String),
}

/// Recursive descriptor of a subtree: a node plus the children reachable
/// through it. `contains_root` is redundant with `root` and the children's
/// own `contains_root` flags but is carried on the wire (as painlessMesh
/// does) so a receiver need not walk the whole subtree to learn reachability
/// to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    pub root: bool,
    #[serde(rename = "containsRoot")]
    pub contains_root: bool,
    pub subs: Vec<NodeTree>,
}

impl NodeTree {
    /// A single node with no children and no root anywhere in its subtree.
    pub fn leaf(node_id: NodeId) -> Self {
        NodeTree { node_id, root: false, contains_root: false, subs: Vec::new() }
    }

    /// Recomputes `contains_root` bottom-up for this node and its subtree,
    /// enforcing the invariant `contains_root == root || any(child.contains_root)`.
    pub fn fix_contains_root(&mut self) {
        for child in &mut self.subs {
            child.fix_contains_root();
        }
        self.contains_root = self.root || self.subs.iter().any(|c| c.contains_root);
    }

    /// Sorts `subs` (recursively) by `node_id`, the canonical form used for
    /// equality and hashing comparisons.
    pub fn canonicalize(&mut self) {
        for child in &mut self.subs {
            child.canonicalize();
        }
        self.subs.sort_by_key(|c| c.node_id);
    }

    /// Structural equality after canonicalizing both sides.
    pub fn equals_canonical(&self, other: &NodeTree) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.canonicalize();
        b.canonicalize();
        a == b
    }

    pub fn serialize(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("NodeTree always serializes")
    }

    pub fn parse(value: &serde_json::Value) -> Result<NodeTree, NodeTreeError> {
        serde_json::from_value(value.clone()).map_err(|e| NodeTreeError::Malformed(e.to_string()))
    }

    pub fn contains(&self, target: NodeId) -> bool {
        self.node_id == target || self.subs.iter().any(|c| c.contains(target))
    }

    /// Total number of nodes in this subtree, including self.
    pub fn size(&self) -> usize {
        1 + self.subs.iter().map(NodeTree::size).sum::<usize>()
    }

    fn adjacency(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        fn walk(node: &NodeTree, adj: &mut HashMap<NodeId, Vec<NodeId>>) {
            let entry = adj.entry(node.node_id).or_default();
            for child in &node.subs {
                entry.push(child.node_id);
                adj.entry(child.node_id).or_default().push(node.node_id);
                walk(child, adj);
            }
        }
        walk(self, &mut adj);
        adj
    }

    /// BFS hop count from `self.node_id` to `target`. `0` if target is self,
    /// `UNREACHABLE_HOPS` (255) if not present in the tree.
    pub fn hop_count(&self, target: NodeId) -> u8 {
        if target == self.node_id {
            return 0;
        }
        let adj = self.adjacency();
        let mut visited = HashMap::new();
        visited.insert(self.node_id, 0u32);
        let mut queue = VecDeque::new();
        queue.push_back(self.node_id);
        while let Some(current) = queue.pop_front() {
            let depth = visited[&current];
            if current == target {
                return depth.min(UNREACHABLE_HOPS as u32) as u8;
            }
            if let Some(neighbors) = adj.get(&current) {
                for &next in neighbors {
                    if !visited.contains_key(&next) {
                        visited.insert(next, depth + 1);
                        queue.push_back(next);
                    }
                }
            }
        }
        visited.get(&target).map(|d| (*d).min(UNREACHABLE_HOPS as u32) as u8).unwrap_or(UNREACHABLE_HOPS)
    }

    /// BFS path from `self.node_id` to `target`, inclusive of both ends.
    /// Empty if unreachable (including if `target` isn't in the tree).
    pub fn path_to(&self, target: NodeId) -> Vec<NodeId> {
        if target == self.node_id {
            return vec![self.node_id];
        }
        let adj = self.adjacency();
        if !adj.contains_key(&target) {
            return Vec::new();
        }
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited = std::collections::HashSet::new();
        visited.insert(self.node_id);
        let mut queue = VecDeque::new();
        queue.push_back(self.node_id);
        let mut found = false;
        while let Some(current) = queue.pop_front() {
            if current == target {
                found = true;
                break;
            }
            if let Some(neighbors) = adj.get(&current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }
        if !found && !visited.contains(&target) {
            return Vec::new();
        }
        let mut path = vec![target];
        let mut cur = target;
        while let Some(&p) = parent.get(&cur) {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }

    /// Maps every reachable destination to the next-hop child of `self`
    /// that leads to it (direct children map to themselves).
    pub fn routing_table(&self) -> HashMap<NodeId, NodeId> {
        let mut table = HashMap::new();
        for child in &self.subs {
            table.insert(child.node_id, child.node_id);
            Self::fill_routing_table(child, child.node_id, &mut table);
        }
        table
    }

    fn fill_routing_table(node: &NodeTree, next_hop: NodeId, table: &mut HashMap<NodeId, NodeId>) {
        for child in &node.subs {
            table.insert(child.node_id, next_hop);
            Self::fill_routing_table(child, next_hop, table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeTree {
        let mut root = NodeTree::leaf(NodeId(1));
        root.root = true;
        let mut b = NodeTree::leaf(NodeId(2));
        let c = NodeTree::leaf(NodeId(3));
        b.subs.push(c);
        root.subs.push(b);
        root.subs.push(NodeTree::leaf(NodeId(4)));
        root.fix_contains_root();
        root
    }

    #[test]
    fn round_trip_is_identity() {
        let tree = sample();
        let json = tree.serialize();
        let parsed = NodeTree::parse(&json).unwrap();
        assert!(tree.equals_canonical(&parsed));
    }

    #[test]
    fn contains_root_propagates_upward() {
        let tree = sample();
        assert!(tree.contains_root);
        assert!(!tree.subs[0].contains_root);
    }

    #[test]
    fn canonicalization_sorts_children() {
        let mut a = NodeTree::leaf(NodeId(1));
        a.subs.push(NodeTree::leaf(NodeId(3)));
        a.subs.push(NodeTree::leaf(NodeId(2)));

        let mut b = NodeTree::leaf(NodeId(1));
        b.subs.push(NodeTree::leaf(NodeId(2)));
        b.subs.push(NodeTree::leaf(NodeId(3)));

        assert!(a.equals_canonical(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn hop_count_self_is_zero_and_unreachable_is_255() {
        let tree = sample();
        assert_eq!(tree.hop_count(NodeId(1)), 0);
        assert_eq!(tree.hop_count(NodeId(99)), UNREACHABLE_HOPS);
        assert_eq!(tree.hop_count(NodeId(3)), 2);
    }

    #[test]
    fn path_to_is_empty_when_unreachable() {
        let tree = sample();
        assert!(tree.path_to(NodeId(99)).is_empty());
        assert_eq!(tree.path_to(NodeId(3)), vec![NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn routing_table_maps_to_first_hop_child() {
        let tree = sample();
        let table = tree.routing_table();
        assert_eq!(table.get(&NodeId(2)), Some(&NodeId(2)));
        assert_eq!(table.get(&NodeId(3)), Some(&NodeId(2)));
        assert_eq!(table.get(&NodeId(4)), Some(&NodeId(4)));
    }

    #[test]
    fn size_counts_every_node() {
        assert_eq!(sample().size(), 4);
    }
}
