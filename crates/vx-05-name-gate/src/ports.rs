//! # Driven Ports
//!
//! The gate reads service state through this trait so it never holds a
//! reference into the shared registry.

use vx_04_service_registry::ServiceRecord;

/// Exact-match lookup of a live service record.
pub trait ServiceLookup: Send + Sync {
    fn lookup_service(&self, fqdn: &str) -> Option<ServiceRecord>;
}

impl<F> ServiceLookup for F
where
    F: Fn(&str) -> Option<ServiceRecord> + Send + Sync,
{
    fn lookup_service(&self, fqdn: &str) -> Option<ServiceRecord> {
        self(fqdn)
    }
}
