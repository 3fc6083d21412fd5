use super::identity::NodeId;
use super::tier::Tier;
use crate::error::{IdentityError, IdentityResult};
use std::collections::BTreeSet;

/// Tracks identifiers known to be in use and hands out free ones.
///
/// Uniqueness is only as good as the set of identities this node has seen;
/// there is no central authority, so collisions remain possible and are
/// detected again at session open.
#[derive(Debug, Clone, Default)]
pub struct IdentifierAllocator {
    in_use: BTreeSet<NodeId>,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identifier for `tier`.
    ///
    /// With a `preferred` identifier, validate and claim it. Without one,
    /// claim the lowest free identifier of the range.
    pub fn allocate(&mut self, tier: Tier, preferred: Option<u32>) -> IdentityResult<NodeId> {
        let id = match preferred {
            Some(raw) => {
                let id = NodeId::new(raw);
                id.check_tier(tier)?;
                if self.in_use.contains(&id) {
                    return Err(IdentityError::Collision { id });
                }
                id
            }
            None => tier
                .range()
                .map(NodeId::new)
                .find(|id| !self.in_use.contains(id))
                .ok_or(IdentityError::Exhausted { tier })?,
        };
        self.in_use.insert(id);
        Ok(id)
    }

    /// Record an identifier observed elsewhere in the network.
    pub fn observe(&mut self, id: NodeId) -> IdentityResult<()> {
        if id.tier().is_none() {
            return Err(IdentityError::UnknownRange { id });
        }
        if !self.in_use.insert(id) {
            return Err(IdentityError::Collision { id });
        }
        Ok(())
    }

    /// Forget an identifier.
    pub fn release(&mut self, id: NodeId) -> bool {
        self.in_use.remove(&id)
    }

    pub fn is_in_use(&self, id: NodeId) -> bool {
        self.in_use.contains(&id)
    }
}
