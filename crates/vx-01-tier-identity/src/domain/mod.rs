//! Domain layer: tiers, identifiers, identities.

mod allocator;
mod identity;
mod tier;

pub use allocator::IdentifierAllocator;
pub use identity::{NodeId, NodeIdentity};
pub use tier::{is_adjacency_legal, Tier};
