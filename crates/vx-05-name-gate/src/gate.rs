use crate::ports::ServiceLookup;
use crate::reserved::ReservedNames;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use vx_01_tier_identity::NodeId;
use vx_04_service_registry::NAMESPACE_SUFFIX;

/// Answer to a name query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Resolution {
    /// Live service record.
    Service {
        fqdn: String,
        address: IpAddr,
        port: u16,
        owner: NodeId,
    },
    /// Reserved infrastructure name.
    Reserved { name: String, address: IpAddr },
    /// Inside the namespace but unknown.
    NotFound { name: String },
    /// Outside the namespace.
    Refused { name: String },
}

impl Resolution {
    pub fn is_refused(&self) -> bool {
        matches!(self, Resolution::Refused { .. })
    }

    /// Address to answer with, if any.
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            Resolution::Service { address, .. } | Resolution::Reserved { address, .. } => {
                Some(*address)
            }
            Resolution::NotFound { .. } | Resolution::Refused { .. } => None,
        }
    }
}

/// Query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub queries: u64,
    pub answered: u64,
    pub not_found: u64,
    pub refused: u64,
}

/// Lowercase, trim, drop one trailing dot; `None` if the result is not a
/// well-formed name inside the closed namespace.
pub fn normalize(query: &str) -> Option<String> {
    let trimmed = query.trim();
    let name = trimmed.strip_suffix('.').unwrap_or(trimmed).to_ascii_lowercase();
    let stem = name.strip_suffix(NAMESPACE_SUFFIX)?;
    let well_formed = !stem.is_empty()
        && stem.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });
    well_formed.then_some(name)
}

/// The resolution gate.
pub struct NameGate<L> {
    reserved: ReservedNames,
    services: L,
    queries: AtomicU64,
    answered: AtomicU64,
    not_found: AtomicU64,
    refused: AtomicU64,
}

impl<L: ServiceLookup> NameGate<L> {
    pub fn new(services: L, reserved: ReservedNames) -> Self {
        Self {
            reserved,
            services,
            queries: AtomicU64::new(0),
            answered: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// Resolve one query.
    pub fn resolve(&self, query: &str) -> Resolution {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let Some(name) = normalize(query) else {
            self.refused.fetch_add(1, Ordering::Relaxed);
            debug!(query, "[vx-05] Refusing query outside the closed namespace");
            return Resolution::Refused {
                name: query.to_string(),
            };
        };

        if let Some(record) = self.services.lookup_service(&name) {
            self.answered.fetch_add(1, Ordering::Relaxed);
            return Resolution::Service {
                fqdn: record.fqdn,
                address: record.owner_address,
                port: record.port,
                owner: record.owner,
            };
        }

        if let Some(address) = self.reserved.get(&name) {
            self.answered.fetch_add(1, Ordering::Relaxed);
            return Resolution::Reserved { name, address };
        }

        self.not_found.fetch_add(1, Ordering::Relaxed);
        Resolution::NotFound { name }
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            queries: self.queries.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }

    pub fn reserved(&self) -> &ReservedNames {
        &self.reserved
    }
}
