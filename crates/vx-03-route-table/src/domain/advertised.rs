use super::entry::RouteEntry;
use super::export::ExportPolicy;
use super::table::RouteTable;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vx_01_tier_identity::{NodeId, Tier};

/// Changes to send to one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDelta {
    pub announce: Vec<RouteEntry>,
    pub withdraw: Vec<IpNet>,
}

impl RouteDelta {
    pub fn is_empty(&self) -> bool {
        self.announce.is_empty() && self.withdraw.is_empty()
    }
}

/// What one session has been sent.
///
/// Withdraws are only ever generated for prefixes present here, so a
/// session never receives a withdraw for something it was not told about.
#[derive(Debug, Clone)]
pub struct AdvertisedSet {
    peer: NodeId,
    peer_tier: Tier,
    sent: BTreeMap<IpNet, RouteEntry>,
}

impl AdvertisedSet {
    pub fn new(peer: NodeId, peer_tier: Tier) -> Self {
        Self {
            peer,
            peer_tier,
            sent: BTreeMap::new(),
        }
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn contains(&self, prefix: &IpNet) -> bool {
        self.sent.contains_key(prefix)
    }

    /// Delta covering the whole merged table; the initial sync burst.
    pub fn full_sync(&mut self, table: &RouteTable, export: &ExportPolicy) -> RouteDelta {
        let mut prefixes: Vec<IpNet> = table.prefixes().copied().collect();
        prefixes.extend(self.sent.keys().copied());
        prefixes.sort();
        prefixes.dedup();
        self.reconcile(table, export, &prefixes)
    }

    /// Delta for `prefixes` after a merge.
    pub fn reconcile(
        &mut self,
        table: &RouteTable,
        export: &ExportPolicy,
        prefixes: &[IpNet],
    ) -> RouteDelta {
        let local_id = table.local_id();
        let mut delta = RouteDelta::default();

        for prefix in prefixes {
            let desired = table
                .best(prefix)
                .filter(|route| export.permits(local_id, self.peer, self.peer_tier, route))
                .map(|route| route.entry.exported_by(local_id));

            match (desired, self.sent.get(prefix)) {
                (Some(desired), Some(sent)) if desired == *sent => {}
                (Some(desired), _) => {
                    self.sent.insert(*prefix, desired.clone());
                    delta.announce.push(desired);
                }
                (None, Some(_)) => {
                    self.sent.remove(prefix);
                    delta.withdraw.push(*prefix);
                }
                (None, None) => {}
            }
        }
        delta
    }
}
