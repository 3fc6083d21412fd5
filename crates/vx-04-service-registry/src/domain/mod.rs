//! Domain layer: records, the registry, per-session export tracking.

mod advertised;
mod record;
mod registry;

pub use advertised::{ServiceAdvertisedSet, ServiceDelta};
pub use record::{ServiceRecord, NAMESPACE_SUFFIX};
pub use registry::{AnnounceOutcome, RecordSource, RegistryStats, ServiceRegistry, StoredRecord};
