//! # Route Table & Path Selection
//!
//! **Subsystem ID:** 3
//!
//! Every established session feeds announce/withdraw messages into its own
//! receive-set. After each change the merge step picks one best entry per
//! prefix; per-session [`AdvertisedSet`]s then diff the merged table against
//! what each neighbour has already been sent.
//!
//! ## Selection order
//!
//! 1. Loop-free entries always win (entries whose path contains the local
//!    identifier are dropped at ingress and never reach the merged table).
//! 2. Configurable criteria, default: higher local-preference, shorter path,
//!    lower MED.
//! 3. Lower originating-peer identifier.
//!
//! ## Export rules (by the receiving session's tier)
//!
//! | Receiving tier | Exported |
//! |----------------|----------|
//! | Backbone | full merged table |
//! | Regional | everything except paths with an Edge node in transit |
//! | Edge | aggregate prefixes and locally originated entries only |
//!
//! Split horizon applies to every session: an entry is never sent to a
//! peer already on its path.
//!
//! ## Import rules
//!
//! Edge nodes are stubs. An Edge peer may only announce prefixes it
//! originates (`path == [edge]`); an Edge node only imports aggregates and
//! prefixes its neighbour originated. Refused entries are counted in
//! [`RouteTableStats::policy_rejected`].

pub mod domain;
pub mod error;

pub use domain::{
    AdvertisedSet, Candidate, Criterion, ExportPolicy, MergeOutcome, Origin, RouteDelta,
    RouteEntry, RouteTable, RouteTableStats, SelectedRoute, SelectionPolicy,
};
pub use error::{RouteError, RouteResult};
pub use ipnet::IpNet;
