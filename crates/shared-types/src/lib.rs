//! # Shared Types Crate
//!
//! Primitives used by every vx0net subsystem.
//!
//! ## Contents
//!
//! - [`Timestamp`]: seconds since the Unix epoch, clamped to a sane maximum.
//! - [`TimeSource`]: the clock port. Domain code never reads the system clock
//!   directly so that expiry and cooldown logic stays deterministic in tests.
//! - [`Backoff`]: capped exponential backoff shared by handshake retries and
//!   bootstrap reconnection.

pub mod backoff;
pub mod time;

pub use backoff::{Backoff, BackoffPolicy};
pub use time::{SystemTimeSource, TimeSource, Timestamp};

#[cfg(any(test, feature = "test-utils"))]
pub use time::ManualTimeSource;
