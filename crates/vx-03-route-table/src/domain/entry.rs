use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use vx_01_tier_identity::NodeId;

/// How the originating node learned the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Configured locally on the originating node.
    Igp,
    /// Redistributed from another routing domain.
    Egp,
    /// Unknown provenance.
    Incomplete,
}

/// A reachability announcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    pub prefix: IpNet,
    pub next_hop: NodeId,
    /// Traversed nodes, nearest first. The last element is the originator.
    pub path: Vec<NodeId>,
    pub origin: Origin,
    pub local_pref: u32,
    pub med: u32,
}

impl RouteEntry {
    /// Default local-preference.
    pub const DEFAULT_LOCAL_PREF: u32 = 100;

    /// Entry for a prefix this node originates. The path is empty until
    /// the entry is exported.
    pub fn local(prefix: IpNet, local_id: NodeId) -> Self {
        Self {
            prefix: prefix.trunc(),
            next_hop: local_id,
            path: Vec::new(),
            origin: Origin::Igp,
            local_pref: Self::DEFAULT_LOCAL_PREF,
            med: 0,
        }
    }

    /// Node that first announced the prefix, `None` for a local entry.
    pub fn originator(&self) -> Option<NodeId> {
        self.path.last().copied()
    }

    pub fn path_contains(&self, node: NodeId) -> bool {
        self.path.contains(&node)
    }

    /// Copy as advertised by `local_id`: prepended to the path and set as
    /// next hop.
    pub fn exported_by(&self, local_id: NodeId) -> RouteEntry {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(local_id);
        path.extend_from_slice(&self.path);
        RouteEntry {
            prefix: self.prefix,
            next_hop: local_id,
            path,
            origin: self.origin,
            local_pref: self.local_pref,
            med: self.med,
        }
    }
}

/// Winner for a prefix in the merged table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedRoute {
    /// Session peer the entry was learned from, or the local id.
    pub source: NodeId,
    pub entry: RouteEntry,
}
