use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use vx_01_tier_identity::NodeId;

/// Suffix of the closed namespace.
pub const NAMESPACE_SUFFIX: &str = ".vx0";

/// A named service hosted by one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Short service name, e.g. `chat`.
    pub name: String,
    /// Fully-qualified name, e.g. `chat.example.vx0`.
    pub fqdn: String,
    pub port: u16,
    pub owner: NodeId,
    pub owner_address: IpAddr,
    pub ttl_secs: u32,
}

impl ServiceRecord {
    /// Default time-to-live.
    pub const DEFAULT_TTL_SECS: u32 = 300;

    /// Build and validate a record. The FQDN is lowercased.
    pub fn new(
        name: impl Into<String>,
        fqdn: impl Into<String>,
        port: u16,
        owner: NodeId,
        owner_address: IpAddr,
        ttl_secs: u32,
    ) -> RegistryResult<Self> {
        let record = Self {
            name: name.into(),
            fqdn: fqdn.into().to_ascii_lowercase(),
            port,
            owner,
            owner_address,
            ttl_secs,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check a record, including ones received from the wire.
    pub fn validate(&self) -> RegistryResult<()> {
        let invalid = |reason| RegistryError::InvalidName {
            fqdn: self.fqdn.clone(),
            reason,
        };

        if self.fqdn != self.fqdn.to_ascii_lowercase() {
            return Err(invalid("not lowercase"));
        }
        let Some(stem) = self.fqdn.strip_suffix(NAMESPACE_SUFFIX) else {
            return Err(invalid("outside the .vx0 namespace"));
        };
        if stem.is_empty() || stem.split('.').any(|label| !is_label(label)) {
            return Err(invalid("malformed label"));
        }
        if self.name.is_empty() {
            return Err(invalid("empty service name"));
        }
        if self.port == 0 {
            return Err(RegistryError::InvalidPort {
                fqdn: self.fqdn.clone(),
            });
        }
        if self.ttl_secs == 0 {
            return Err(RegistryError::InvalidTtl {
                fqdn: self.fqdn.clone(),
            });
        }
        Ok(())
    }
}

fn is_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}
