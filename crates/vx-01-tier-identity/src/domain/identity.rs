use super::tier::Tier;
use crate::error::{IdentityError, IdentityResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Numeric node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Wrap a raw identifier. No range check; see [`NodeId::tier`].
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Tier whose range contains this identifier.
    pub fn tier(self) -> Option<Tier> {
        Tier::from_identifier(self.0)
    }

    /// Ok if the identifier lies inside `tier`'s range.
    pub fn check_tier(self, tier: Tier) -> IdentityResult<()> {
        let range = tier.range();
        if range.contains(&self.0) {
            return Ok(());
        }
        Err(IdentityError::OutOfRange {
            id: self,
            tier,
            start: *range.start(),
            end: *range.end(),
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identity a node presents to its peers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    id: NodeId,
    tier: Tier,
    address: IpAddr,
    name: String,
}

impl NodeIdentity {
    /// Build an identity, checking id/tier consistency and the name.
    pub fn new(
        id: NodeId,
        tier: Tier,
        address: IpAddr,
        name: impl Into<String>,
    ) -> IdentityResult<Self> {
        id.check_tier(tier)?;
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(IdentityError::InvalidName { name });
        }
        Ok(Self {
            id,
            tier,
            address,
            name,
        })
    }

    /// Re-check an identity received from the wire.
    ///
    /// Deserialization bypasses `new`, so remote identities go through here.
    pub fn validate(&self) -> IdentityResult<()> {
        self.id.check_tier(self.tier)?;
        if !is_valid_name(&self.name) {
            return Err(IdentityError::InvalidName {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} {}, {})", self.name, self.tier, self.id, self.address)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}
