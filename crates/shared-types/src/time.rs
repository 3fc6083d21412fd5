//! Wall-clock seconds and the clock port.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Maximum reasonable timestamp (year 9999).
    ///
    /// Peer-supplied TTLs are added to `now`; clamping keeps expiry
    /// comparisons well-defined whatever a remote node announces.
    pub const MAX_REASONABLE: u64 = 253_402_300_799;

    /// Create a new timestamp, clamping to `MAX_REASONABLE`.
    pub fn new(secs: u64) -> Self {
        Self(secs.min(Self::MAX_REASONABLE))
    }

    /// Get the underlying seconds value.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Add seconds (saturating at `MAX_REASONABLE`).
    pub fn add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs).min(Self::MAX_REASONABLE))
    }

    /// Subtract seconds (saturating at 0).
    pub fn sub_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Seconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn secs_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Abstract clock.
///
/// Implementations must be `Send + Sync`: the routing hub and the channel
/// manager share one clock across every session task.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Production time source using the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Create a new system time source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(duration.as_secs())
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use super::{TimeSource, Timestamp};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock advanced explicitly by tests.
    #[derive(Debug, Default)]
    pub struct ManualTimeSource {
        secs: AtomicU64,
    }

    impl ManualTimeSource {
        /// Start the clock at `initial` seconds.
        pub fn new(initial: u64) -> Self {
            Self {
                secs: AtomicU64::new(initial),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, secs: u64) {
            self.secs.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualTimeSource {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.secs.load(Ordering::SeqCst))
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualTimeSource;
