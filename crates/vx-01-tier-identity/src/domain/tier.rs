use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Hierarchical rank of a node. Ordered from most central to leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Core routing infrastructure.
    Backbone,
    /// Regional aggregation.
    Regional,
    /// Leaf nodes hosting services.
    Edge,
}

/// Legal adjacency relation, indexed by `Tier::index()`.
const ADJACENCY: [[bool; 3]; 3] = [
    //  Backbone Regional Edge
    [true, true, false], // Backbone
    [true, true, true],  // Regional
    [false, true, false], // Edge
];

/// Whether nodes of tiers `a` and `b` may hold a direct session.
pub fn is_adjacency_legal(a: Tier, b: Tier) -> bool {
    ADJACENCY[a.index()][b.index()]
}

impl Tier {
    /// All tiers, most central first.
    pub const ALL: [Tier; 3] = [Tier::Backbone, Tier::Regional, Tier::Edge];

    fn index(self) -> usize {
        match self {
            Tier::Backbone => 0,
            Tier::Regional => 1,
            Tier::Edge => 2,
        }
    }

    /// Reserved identifier range.
    pub fn range(self) -> RangeInclusive<u32> {
        match self {
            Tier::Backbone => 65_000..=65_099,
            Tier::Regional => 65_100..=65_999,
            Tier::Edge => 66_000..=69_999,
        }
    }

    /// Tier owning `id`, if any.
    pub fn from_identifier(id: u32) -> Option<Tier> {
        Tier::ALL.into_iter().find(|tier| tier.range().contains(&id))
    }

    /// Maximum concurrent sessions a node of this tier accepts.
    pub fn max_peers(self) -> usize {
        match self {
            Tier::Backbone => 50,
            Tier::Regional => 20,
            Tier::Edge => 5,
        }
    }

    /// `true` if `self` sits strictly closer to the backbone than `other`.
    pub fn is_above(self, other: Tier) -> bool {
        self < other
    }

    /// Lowercase name used in configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Backbone => "backbone",
            Tier::Regional => "regional",
            Tier::Edge => "edge",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backbone" => Ok(Tier::Backbone),
            "regional" => Ok(Tier::Regional),
            "edge" => Ok(Tier::Edge),
            _ => Err(IdentityError::UnknownTier {
                value: s.to_string(),
            }),
        }
    }
}
