//! Domain layer: route entries, selection, export filtering, tables.

mod advertised;
mod entry;
mod export;
mod selection;
mod table;

pub use advertised::{AdvertisedSet, RouteDelta};
pub use entry::{Origin, RouteEntry, SelectedRoute};
pub use export::ExportPolicy;
pub use selection::{Candidate, Criterion, SelectionPolicy};
pub use table::{MergeOutcome, RouteTable, RouteTableStats};
