//! # Name Resolution Gate
//!
//! **Subsystem ID:** 5
//!
//! Answers name queries for the closed `.vx0` namespace:
//!
//! 1. Anything outside the namespace is refused. This check runs before any
//!    table is consulted and cannot be disabled; it is what keeps the
//!    overlay isolated from the public DNS.
//! 2. An exact Service Registry match answers with the owner's address and
//!    the service port.
//! 3. Otherwise a reserved infrastructure name may answer.
//! 4. Otherwise the name does not exist.
//!
//! Refused queries are never forwarded and never cached.

pub mod error;
pub mod gate;
pub mod ports;
pub mod reserved;

pub use error::GateError;
pub use gate::{normalize, GateStats, NameGate, Resolution};
pub use ports::ServiceLookup;
pub use reserved::ReservedNames;
