//! Error types for the service registry.

use thiserror::Error;
use vx_01_tier_identity::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// FQDN outside the closed namespace or malformed
    #[error("invalid service name {fqdn:?}: {reason}")]
    InvalidName { fqdn: String, reason: &'static str },

    /// Port zero
    #[error("service {fqdn} has port 0")]
    InvalidPort { fqdn: String },

    /// TTL zero
    #[error("service {fqdn} has a zero ttl")]
    InvalidTtl { fqdn: String },

    /// Local registration for a record owned by another node
    #[error("service {fqdn} is owned by {owner}, not by this node")]
    NotOwner { fqdn: String, owner: NodeId },

    /// No such record
    #[error("service {fqdn} is not registered")]
    NotFound { fqdn: String },

    /// Record exists but was learned from a peer
    #[error("service {fqdn} was not registered on this node")]
    NotLocal { fqdn: String },
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
