use super::record::ServiceRecord;
use crate::error::{RegistryError, RegistryResult};
use serde::Serialize;
use shared_types::Timestamp;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use vx_01_tier_identity::NodeId;

/// Where a stored record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSource {
    /// Registered on this node by an operator.
    Local,
    /// Learned from the session with this peer.
    Peer(NodeId),
}

/// A record plus its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub record: ServiceRecord,
    /// Latest announcer.
    pub source: RecordSource,
    /// Every peer whose session currently carries this record. Empty for
    /// local records.
    pub carriers: BTreeSet<NodeId>,
    pub expires_at: Timestamp,
}

impl StoredRecord {
    pub fn is_carried_by(&self, peer: NodeId) -> bool {
        self.carriers.contains(&peer)
    }
}

/// Result of applying an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// New name.
    Inserted,
    /// Same owner re-announced; expiry extended.
    Refreshed,
    /// Different owner took the name over (last writer wins).
    Replaced { previous_owner: NodeId },
    /// A peer echoed back a record this node owns.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub announcements: u64,
    pub withdrawals: u64,
    pub expirations: u64,
    pub collisions: u64,
}

/// All service records this node knows about, keyed by FQDN.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    local_id: NodeId,
    records: BTreeMap<String, StoredRecord>,
    stats: RegistryStats,
}

impl ServiceRegistry {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            records: BTreeMap::new(),
            stats: RegistryStats::default(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    // =========================================================================
    // Local registrations
    // =========================================================================

    /// Register a service hosted on this node.
    pub fn register_local(
        &mut self,
        record: ServiceRecord,
        now: Timestamp,
    ) -> RegistryResult<AnnounceOutcome> {
        record.validate()?;
        if record.owner != self.local_id {
            return Err(RegistryError::NotOwner {
                fqdn: record.fqdn,
                owner: record.owner,
            });
        }
        info!(fqdn = %record.fqdn, port = record.port, "[vx-04] Registering local service");
        Ok(self.store(record, RecordSource::Local, now))
    }

    /// Extend a local record's expiry by its TTL.
    pub fn refresh_local(&mut self, fqdn: &str, now: Timestamp) -> RegistryResult<()> {
        let stored = self.local_entry_mut(fqdn)?;
        stored.expires_at = now.add_secs(u64::from(stored.record.ttl_secs));
        Ok(())
    }

    /// Refresh every local record; returns the refreshed names.
    pub fn refresh_all_local(&mut self, now: Timestamp) -> Vec<String> {
        self.records
            .iter_mut()
            .filter(|(_, stored)| stored.source == RecordSource::Local)
            .map(|(fqdn, stored)| {
                stored.expires_at = now.add_secs(u64::from(stored.record.ttl_secs));
                fqdn.clone()
            })
            .collect()
    }

    /// Remove a local record.
    pub fn unregister_local(&mut self, fqdn: &str) -> RegistryResult<ServiceRecord> {
        self.local_entry_mut(fqdn)?;
        self.stats.withdrawals += 1;
        self.records
            .remove(fqdn)
            .map(|stored| stored.record)
            .ok_or_else(|| RegistryError::NotFound {
                fqdn: fqdn.to_string(),
            })
    }

    fn local_entry_mut(&mut self, fqdn: &str) -> RegistryResult<&mut StoredRecord> {
        match self.records.get_mut(fqdn) {
            Some(stored) if stored.source == RecordSource::Local => Ok(stored),
            Some(_) => Err(RegistryError::NotLocal {
                fqdn: fqdn.to_string(),
            }),
            None => Err(RegistryError::NotFound {
                fqdn: fqdn.to_string(),
            }),
        }
    }

    // =========================================================================
    // Peer announcements
    // =========================================================================

    /// Apply a record announced by `peer`.
    pub fn apply_announce(
        &mut self,
        peer: NodeId,
        record: ServiceRecord,
        now: Timestamp,
    ) -> RegistryResult<AnnounceOutcome> {
        record.validate()?;
        if record.owner == self.local_id {
            debug!(%peer, fqdn = %record.fqdn, "[vx-04] Ignoring echo of a local service");
            return Ok(AnnounceOutcome::Ignored);
        }
        Ok(self.store(record, RecordSource::Peer(peer), now))
    }

    /// Withdraw `peer`'s copy of `fqdn`. The record itself is removed, and
    /// returned, only when no other session still carries it.
    pub fn apply_withdraw(&mut self, peer: NodeId, fqdn: &str) -> Option<ServiceRecord> {
        let stored = self.records.get_mut(fqdn)?;
        if !stored.carriers.remove(&peer) {
            return None;
        }
        if let Some(&next) = stored.carriers.iter().next() {
            stored.source = RecordSource::Peer(next);
            debug!(%peer, %fqdn, carrier = %next, "[vx-04] Record still carried by another session");
            return None;
        }
        self.stats.withdrawals += 1;
        self.records.remove(fqdn).map(|stored| stored.record)
    }

    /// Release everything `peer` carried. Returns every name whose record
    /// was removed or passed to another carrier; a second call returns
    /// nothing.
    pub fn drop_peer(&mut self, peer: NodeId) -> Vec<String> {
        let touched: Vec<String> = self
            .records
            .iter()
            .filter(|(_, stored)| stored.is_carried_by(peer))
            .map(|(fqdn, _)| fqdn.clone())
            .collect();
        for fqdn in &touched {
            self.apply_withdraw(peer, fqdn);
        }
        touched
    }

    /// Drop records whose TTL has passed.
    pub fn expire(&mut self, now: Timestamp) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, stored)| stored.expires_at <= now)
            .map(|(fqdn, _)| fqdn.clone())
            .collect();
        for fqdn in &expired {
            debug!(%fqdn, "[vx-04] Service record expired");
            self.records.remove(fqdn);
        }
        self.stats.expirations += expired.len() as u64;
        expired
    }

    fn store(&mut self, record: ServiceRecord, source: RecordSource, now: Timestamp) -> AnnounceOutcome {
        self.stats.announcements += 1;
        let expires_at = now.add_secs(u64::from(record.ttl_secs));
        let fqdn = record.fqdn.clone();
        let mut carriers = BTreeSet::new();

        let outcome = match self.records.get_mut(&fqdn) {
            None => AnnounceOutcome::Inserted,
            Some(existing) if existing.record.owner == record.owner => {
                carriers = std::mem::take(&mut existing.carriers);
                AnnounceOutcome::Refreshed
            }
            Some(existing) => {
                self.stats.collisions += 1;
                warn!(
                    %fqdn,
                    previous_owner = %existing.record.owner,
                    new_owner = %record.owner,
                    "[vx-04] Service name claimed by two owners; keeping the latest announcement"
                );
                AnnounceOutcome::Replaced {
                    previous_owner: existing.record.owner,
                }
            }
        };
        if let RecordSource::Peer(peer) = source {
            carriers.insert(peer);
        }

        self.records.insert(
            fqdn,
            StoredRecord {
                record,
                source,
                carriers,
                expires_at,
            },
        );
        outcome
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Live record for `fqdn`. Records past their expiry are invisible even
    /// before the next `expire` sweep.
    pub fn lookup(&self, fqdn: &str, now: Timestamp) -> Option<&ServiceRecord> {
        self.records
            .get(fqdn)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| &stored.record)
    }

    pub fn get(&self, fqdn: &str) -> Option<&StoredRecord> {
        self.records.get(fqdn)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> {
        self.records.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
