use super::entry::{RouteEntry, SelectedRoute};
use super::export::ExportPolicy;
use super::selection::{Candidate, SelectionPolicy};
use crate::error::{RouteError, RouteResult};
use ipnet::IpNet;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};
use vx_01_tier_identity::NodeId;

/// Counters exposed through the management snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteTableStats {
    pub announcements: u64,
    pub withdrawals: u64,
    pub loops_rejected: u64,
    pub policy_rejected: u64,
    pub selection_changes: u64,
}

/// Prefixes whose merged entry changed or disappeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed: BTreeSet<IpNet>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn extend(&mut self, other: MergeOutcome) {
        self.changed.extend(other.changed);
    }
}

/// Receive-sets plus the merged best-path table.
///
/// Every mutating method runs the merge for the prefixes it touched before
/// returning, so callers never observe a half-applied announcement.
#[derive(Debug, Clone)]
pub struct RouteTable {
    local_id: NodeId,
    policy: SelectionPolicy,
    local: BTreeMap<IpNet, RouteEntry>,
    received: HashMap<NodeId, BTreeMap<IpNet, RouteEntry>>,
    merged: BTreeMap<IpNet, SelectedRoute>,
    stats: RouteTableStats,
}

impl RouteTable {
    pub fn new(local_id: NodeId, policy: SelectionPolicy) -> Self {
        Self {
            local_id,
            policy,
            local: BTreeMap::new(),
            received: HashMap::new(),
            merged: BTreeMap::new(),
            stats: RouteTableStats::default(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn stats(&self) -> RouteTableStats {
        self.stats
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply announcements from `peer`.
    ///
    /// The whole batch is validated before anything is stored. Entries whose
    /// path already contains the local identifier are loops: they are
    /// dropped, and replace (withdraw) any earlier entry from the same peer.
    pub fn announce(&mut self, peer: NodeId, entries: Vec<RouteEntry>) -> RouteResult<MergeOutcome> {
        self.ingest(peer, entries, |_| true)
    }

    /// [`announce`](Self::announce) behind the tier import filter of
    /// `policy`. Refused entries are dropped like loops and counted.
    pub fn import(
        &mut self,
        peer: NodeId,
        entries: Vec<RouteEntry>,
        policy: &ExportPolicy,
    ) -> RouteResult<MergeOutcome> {
        let local_id = self.local_id;
        self.ingest(peer, entries, |entry| policy.accepts(local_id, peer, entry))
    }

    fn ingest<F>(&mut self, peer: NodeId, entries: Vec<RouteEntry>, accept: F) -> RouteResult<MergeOutcome>
    where
        F: Fn(&RouteEntry) -> bool,
    {
        for entry in &entries {
            validate(peer, entry)?;
        }

        let mut touched = BTreeSet::new();
        let set = self.received.entry(peer).or_default();
        for entry in entries {
            self.stats.announcements += 1;
            let prefix = entry.prefix;
            if entry.path_contains(self.local_id) {
                self.stats.loops_rejected += 1;
                debug!(%peer, %prefix, "[vx-03] Dropping looped announcement");
            } else if !accept(&entry) {
                self.stats.policy_rejected += 1;
                warn!(%peer, %prefix, path = ?entry.path, "[vx-03] Announcement refused by tier policy");
            } else {
                set.insert(prefix, entry);
                touched.insert(prefix);
                continue;
            }
            if set.remove(&prefix).is_some() {
                touched.insert(prefix);
            }
        }

        Ok(self.merge(touched))
    }

    /// Remove `prefixes` from `peer`'s receive-set. Unknown prefixes are ignored.
    pub fn withdraw(&mut self, peer: NodeId, prefixes: &[IpNet]) -> MergeOutcome {
        let Some(set) = self.received.get_mut(&peer) else {
            return MergeOutcome::default();
        };
        let mut touched = BTreeSet::new();
        for prefix in prefixes {
            if set.remove(prefix).is_some() {
                self.stats.withdrawals += 1;
                touched.insert(*prefix);
            }
        }
        self.merge(touched)
    }

    /// Forget everything `peer` contributed. A second call is a no-op.
    pub fn drop_peer(&mut self, peer: NodeId) -> MergeOutcome {
        let Some(set) = self.received.remove(&peer) else {
            return MergeOutcome::default();
        };
        self.stats.withdrawals += set.len() as u64;
        self.merge(set.into_keys().collect())
    }

    /// Originate a prefix from this node.
    pub fn originate(&mut self, entry: RouteEntry) -> MergeOutcome {
        let prefix = entry.prefix.trunc();
        let entry = RouteEntry {
            prefix,
            next_hop: self.local_id,
            path: Vec::new(),
            ..entry
        };
        self.local.insert(prefix, entry);
        self.merge(BTreeSet::from([prefix]))
    }

    /// Stop originating a prefix.
    pub fn retract(&mut self, prefix: &IpNet) -> MergeOutcome {
        if self.local.remove(prefix).is_none() {
            return MergeOutcome::default();
        }
        self.merge(BTreeSet::from([*prefix]))
    }

    fn merge(&mut self, touched: BTreeSet<IpNet>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for prefix in touched {
            let best = self.select(&prefix).map(|c| SelectedRoute {
                source: c.source,
                entry: c.entry.clone(),
            });
            let changed = match best {
                Some(route) => self.merged.insert(prefix, route.clone()).as_ref() != Some(&route),
                None => self.merged.remove(&prefix).is_some(),
            };
            if changed {
                self.stats.selection_changes += 1;
                outcome.changed.insert(prefix);
            }
        }
        outcome
    }

    fn select(&self, prefix: &IpNet) -> Option<Candidate<'_>> {
        let local = self.local.get(prefix).map(|entry| Candidate {
            source: self.local_id,
            entry,
        });
        let received = self.received.iter().filter_map(|(peer, set)| {
            set.get(prefix).map(|entry| Candidate {
                source: *peer,
                entry,
            })
        });
        self.policy.select(self.local_id, local.into_iter().chain(received))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Merged winner for a prefix.
    pub fn best(&self, prefix: &IpNet) -> Option<&SelectedRoute> {
        self.merged.get(prefix)
    }

    /// Merged table in prefix order.
    pub fn routes(&self) -> impl Iterator<Item = &SelectedRoute> {
        self.merged.values()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &IpNet> {
        self.merged.keys()
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Size of `peer`'s receive-set.
    pub fn received_count(&self, peer: NodeId) -> usize {
        self.received.get(&peer).map_or(0, BTreeMap::len)
    }

    /// Prefixes this node originates.
    pub fn local_prefixes(&self) -> impl Iterator<Item = &IpNet> {
        self.local.keys()
    }
}

fn validate(peer: NodeId, entry: &RouteEntry) -> RouteResult<()> {
    let prefix = entry.prefix;
    if prefix.trunc() != prefix {
        return Err(RouteError::NonCanonicalPrefix { prefix });
    }
    let Some(first) = entry.path.first().copied() else {
        return Err(RouteError::EmptyPath { prefix });
    };
    if first != peer {
        return Err(RouteError::PathHeadMismatch {
            prefix,
            peer,
            first,
        });
    }
    if entry.next_hop != peer {
        return Err(RouteError::NextHopMismatch {
            prefix,
            peer,
            next_hop: entry.next_hop,
        });
    }
    let mut seen = HashSet::with_capacity(entry.path.len());
    if let Some(node) = entry.path.iter().find(|node| !seen.insert(**node)) {
        return Err(RouteError::DuplicateHop {
            prefix,
            node: *node,
        });
    }
    Ok(())
}
