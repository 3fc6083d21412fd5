//! Remote addresses cooling down after failed authentication.

use shared_types::Timestamp;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry {
    pub until: Timestamp,
    pub reason: String,
    /// Consecutive failures; each one doubles the window.
    pub failures: u32,
}

/// Tracks cooled-down addresses with expiration times.
#[derive(Debug, Clone, Default)]
pub struct CooldownList {
    entries: HashMap<IpAddr, CooldownEntry>,
}

impl CooldownList {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Record a failure. Repeat offenders get `base_secs * 2^(failures-1)`,
    /// capped at 64 times the base window.
    pub fn cool_down(
        &mut self,
        address: IpAddr,
        now: Timestamp,
        base_secs: u64,
        reason: impl Into<String>,
    ) -> Timestamp {
        let failures = self
            .entries
            .get(&address)
            .map_or(1, |entry| entry.failures.saturating_add(1));
        let factor = 1u64 << (failures - 1).min(6);
        let until = now.add_secs(base_secs.saturating_mul(factor));
        self.entries.insert(
            address,
            CooldownEntry {
                until,
                reason: reason.into(),
                failures,
            },
        );
        until
    }

    pub fn is_cooling(&self, address: &IpAddr, now: Timestamp) -> bool {
        self.entries
            .get(address)
            .is_some_and(|entry| entry.until > now)
    }

    /// Forget an address after a successful handshake.
    pub fn clear(&mut self, address: &IpAddr) {
        self.entries.remove(address);
    }

    pub fn get(&self, address: &IpAddr) -> Option<&CooldownEntry> {
        self.entries.get(address)
    }

    /// Remove expired entries
    pub fn gc_expired(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.until > now);
        before - self.entries.len()
    }

    pub fn count(&self, now: Timestamp) -> usize {
        self.entries.values().filter(|e| e.until > now).count()
    }
}
