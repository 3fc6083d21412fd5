//! Error types for the tier and identity model.

use crate::domain::{NodeId, Tier};
use thiserror::Error;

/// Identity validation and allocation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Identifier lies outside the requested tier's range
    #[error("identifier {id} is outside the {tier} range {start}..={end}")]
    OutOfRange {
        id: NodeId,
        tier: Tier,
        start: u32,
        end: u32,
    },

    /// Identifier belongs to no tier at all
    #[error("identifier {id} is not in any tier range")]
    UnknownRange { id: NodeId },

    /// Identifier already in use by another node
    #[error("identifier {id} is already in use")]
    Collision { id: NodeId },

    /// Every identifier of the tier is taken
    #[error("no free identifier left in the {tier} range")]
    Exhausted { tier: Tier },

    /// Symbolic name is empty or not a DNS-style label sequence
    #[error("invalid node name: {name:?}")]
    InvalidName { name: String },

    /// Tier name could not be parsed
    #[error("unknown tier: {value:?}")]
    UnknownTier { value: String },
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
