//! Service layer: routing hub, session tasks, bootstrap scheduler and the
//! engine that ties them to real sockets.

pub mod bootstrap;
pub mod engine;
pub mod hub;
pub mod session;
pub mod sessions;

pub use bootstrap::run_bootstrap;
pub use engine::{
    EngineConfig, EngineCounters, EngineSnapshot, LocalService, PeerEngine,
    DEFAULT_HANDSHAKE_PORT, DEFAULT_SESSION_PORT,
};
pub use hub::{AttachedSummary, DetachReport, HubServices, HubSnapshot, Outbox, RoutingHub};
pub use session::{
    run_inbound, run_outbound, SessionConfig, SessionContext, SessionCounters, SessionOutcome,
    MIN_HOLD_TIME_SECS,
};
pub use sessions::{Claim, SessionInfo, SessionTable};

#[cfg(test)]
mod tests;
