use super::entry::RouteEntry;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use vx_01_tier_identity::NodeId;

/// A tie-break criterion between loop rejection and the final identifier
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Higher local-preference wins.
    LocalPref,
    /// Shorter path wins.
    PathLength,
    /// Lower multi-exit discriminator wins.
    Med,
    /// Lower origin marker wins (Igp before Egp before Incomplete).
    Origin,
}

/// Ordered tie-break.
///
/// Loop rejection always runs first and the originating-peer identifier
/// always runs last, so the order is total whatever criteria are chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub order: Vec<Criterion>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            order: vec![Criterion::LocalPref, Criterion::PathLength, Criterion::Med],
        }
    }
}

/// An entry competing for a prefix, with the session it came from.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub source: NodeId,
    pub entry: &'a RouteEntry,
}

impl SelectionPolicy {
    /// `Ordering::Less` means `a` is preferred over `b`.
    pub fn compare(&self, local_id: NodeId, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        let a_loops = a.entry.path_contains(local_id);
        let b_loops = b.entry.path_contains(local_id);

        a_loops
            .cmp(&b_loops)
            .then_with(|| {
                self.order
                    .iter()
                    .map(|criterion| criterion.compare(a.entry, b.entry))
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.source.cmp(&b.source))
    }

    /// Best loop-free candidate, if any.
    pub fn select<'a, I>(&self, local_id: NodeId, candidates: I) -> Option<Candidate<'a>>
    where
        I: IntoIterator<Item = Candidate<'a>>,
    {
        candidates
            .into_iter()
            .filter(|c| !c.entry.path_contains(local_id))
            .min_by(|a, b| self.compare(local_id, a, b))
    }
}

impl Criterion {
    fn compare(self, a: &RouteEntry, b: &RouteEntry) -> Ordering {
        match self {
            Criterion::LocalPref => b.local_pref.cmp(&a.local_pref),
            Criterion::PathLength => a.path.len().cmp(&b.path.len()),
            Criterion::Med => a.med.cmp(&b.med),
            Criterion::Origin => a.origin.cmp(&b.origin),
        }
    }
}
