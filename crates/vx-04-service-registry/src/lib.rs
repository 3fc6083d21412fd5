//! # Service Registry Propagation
//!
//! **Subsystem ID:** 4
//!
//! Service records announce `name.vx0 → (owner, port)` bindings. They travel
//! through the same sessions as routes but skip path selection entirely:
//! distinct names coexist, and two owners claiming one name are settled by
//! last-writer-wins with a logged anomaly.
//!
//! ## Lifecycle
//!
//! 1. An operator registers a record on its hosting node ([`ServiceRegistry::register_local`]).
//! 2. The record is exported upward: Edge → Regional → Backbone, and between
//!    Backbone nodes for records that did not come from another Backbone.
//! 3. Every holder drops it once its TTL passes without a refresh, or at
//!    once when the session it was learned from closes.

pub mod domain;
pub mod error;

pub use domain::{
    AnnounceOutcome, RecordSource, RegistryStats, ServiceAdvertisedSet, ServiceDelta,
    ServiceRecord, ServiceRegistry, StoredRecord, NAMESPACE_SUFFIX,
};
pub use error::{RegistryError, RegistryResult};
