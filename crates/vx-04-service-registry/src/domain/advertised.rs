use super::record::ServiceRecord;
use super::registry::{RecordSource, ServiceRegistry, StoredRecord};
use serde::{Deserialize, Serialize};
use shared_types::Timestamp;
use std::collections::BTreeMap;
use vx_01_tier_identity::{NodeId, Tier};

/// Service changes to send to one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDelta {
    pub announce: Vec<ServiceRecord>,
    pub withdraw: Vec<String>,
}

impl ServiceDelta {
    pub fn is_empty(&self) -> bool {
        self.announce.is_empty() && self.withdraw.is_empty()
    }
}

/// Records sent to one session, with the expiry they were sent at so that
/// refreshes are forwarded too.
#[derive(Debug, Clone)]
pub struct ServiceAdvertisedSet {
    peer: NodeId,
    peer_tier: Tier,
    local_tier: Tier,
    sent: BTreeMap<String, (NodeId, Timestamp)>,
}

impl ServiceAdvertisedSet {
    pub fn new(local_tier: Tier, peer: NodeId, peer_tier: Tier) -> Self {
        Self {
            peer,
            peer_tier,
            local_tier,
            sent: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn contains(&self, fqdn: &str) -> bool {
        self.sent.contains_key(fqdn)
    }

    /// Upward propagation: toward a more central tier, and across the
    /// Backbone mesh for records that did not come from another Backbone.
    /// Never back to a session that carries the record.
    pub fn permits(&self, stored: &StoredRecord) -> bool {
        if stored.is_carried_by(self.peer) || stored.record.owner == self.peer {
            return false;
        }
        if self.peer_tier.is_above(self.local_tier) {
            return true;
        }
        match (self.local_tier, self.peer_tier) {
            (Tier::Backbone, Tier::Backbone) => match stored.source {
                RecordSource::Local => true,
                RecordSource::Peer(_) => !stored
                    .carriers
                    .iter()
                    .any(|carrier| carrier.tier() == Some(Tier::Backbone)),
            },
            _ => false,
        }
    }

    /// Delta over the whole registry; the initial sync burst.
    pub fn full_sync(&mut self, registry: &ServiceRegistry) -> ServiceDelta {
        let mut names: Vec<String> = registry.names().cloned().collect();
        names.extend(self.sent.keys().cloned());
        names.sort();
        names.dedup();
        self.reconcile(registry, &names)
    }

    /// Delta for the given names after a registry change.
    pub fn reconcile(&mut self, registry: &ServiceRegistry, names: &[String]) -> ServiceDelta {
        let mut delta = ServiceDelta::default();
        for fqdn in names {
            let desired = registry.get(fqdn).filter(|stored| self.permits(stored));
            match (desired, self.sent.get(fqdn)) {
                (Some(stored), Some(&(owner, expires_at)))
                    if owner == stored.record.owner && expires_at == stored.expires_at => {}
                (Some(stored), _) => {
                    self.sent
                        .insert(fqdn.clone(), (stored.record.owner, stored.expires_at));
                    delta.announce.push(stored.record.clone());
                }
                (None, Some(_)) => {
                    self.sent.remove(fqdn);
                    delta.withdraw.push(fqdn.clone());
                }
                (None, None) => {}
            }
        }
        delta
    }
}
