use super::entry::{RouteEntry, SelectedRoute};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use vx_01_tier_identity::{NodeId, Tier};

/// Tier-dependent filters for what a session may send and receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPolicy {
    /// Default and aggregate prefixes that Edge sessions may receive.
    pub aggregates: Vec<IpNet>,
}

impl Default for ExportPolicy {
    fn default() -> Self {
        Self {
            aggregates: vec![
                IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0)),
                IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8)),
            ],
        }
    }
}

impl ExportPolicy {
    pub fn new(aggregates: Vec<IpNet>) -> Self {
        Self { aggregates }
    }

    pub fn is_aggregate(&self, prefix: &IpNet) -> bool {
        self.aggregates.contains(prefix)
    }

    /// Whether `route` may be advertised by `local_id` to a session with
    /// `peer` of tier `peer_tier`.
    pub fn permits(
        &self,
        local_id: NodeId,
        peer: NodeId,
        peer_tier: Tier,
        route: &SelectedRoute,
    ) -> bool {
        if route.source == peer || route.entry.path_contains(peer) {
            return false;
        }

        match peer_tier {
            Tier::Backbone => true,
            Tier::Regional => !has_edge_in_transit(local_id, route),
            Tier::Edge => route.source == local_id || self.is_aggregate(&route.entry.prefix),
        }
    }
}

impl ExportPolicy {
    /// Whether `entry`, announced by `peer`, may enter `local_id`'s table.
    ///
    /// Edge nodes are stubs in both directions: an Edge peer may only
    /// announce its own prefixes, and an Edge node only takes aggregates
    /// plus prefixes its neighbour originated.
    pub fn accepts(&self, local_id: NodeId, peer: NodeId, entry: &RouteEntry) -> bool {
        let originated_by_peer = entry.path.as_slice() == [peer];
        if peer.tier() == Some(Tier::Edge) {
            return originated_by_peer;
        }
        if local_id.tier() == Some(Tier::Edge) {
            return originated_by_peer || self.is_aggregate(&entry.prefix);
        }
        true
    }
}

/// Edge nodes are stubs: in the exported path `[local, path..]` only the
/// last element (the originator) may be an Edge node.
fn has_edge_in_transit(local_id: NodeId, route: &SelectedRoute) -> bool {
    let exported_len = route.entry.path.len() + 1;
    std::iter::once(local_id)
        .chain(route.entry.path.iter().copied())
        .take(exported_len - 1)
        .any(|node| node.tier() == Some(Tier::Edge))
}
