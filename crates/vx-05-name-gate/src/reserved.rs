//! Well-known infrastructure names backed by static configuration.

use crate::error::GateError;
use crate::gate::normalize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedNames {
    entries: BTreeMap<String, IpAddr>,
}

impl Default for ReservedNames {
    /// Gateway and the two name servers of the overlay.
    fn default() -> Self {
        let entries = [
            ("gateway.vx0", Ipv4Addr::new(10, 0, 0, 1)),
            ("ns1.vx0", Ipv4Addr::new(10, 0, 0, 2)),
            ("ns2.vx0", Ipv4Addr::new(10, 0, 0, 3)),
        ]
        .into_iter()
        .map(|(name, addr)| (name.to_string(), IpAddr::V4(addr)))
        .collect();
        Self { entries }
    }
}

impl ReservedNames {
    /// No reserved names at all.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or override a name.
    pub fn insert(&mut self, name: &str, address: IpAddr) -> Result<(), GateError> {
        let normalized = normalize(name).ok_or_else(|| GateError::OutsideNamespace {
            name: name.to_string(),
        })?;
        self.entries.insert(normalized, address);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<IpAddr> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
