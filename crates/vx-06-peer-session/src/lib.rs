//! # Peer Session Engine
//!
//! **Subsystem ID:** 6
//!
//! Drives every peer relationship of a node from first contact to teardown
//! and moves reachability between sessions.
//!
//! ## Session lifecycle
//!
//! ```text
//! Idle -> Connecting -> ChannelPending -> SessionOpen -> Established
//!                                              |              |
//!                                              v              v
//!                                          Rejected        Closing -> Idle
//! ```
//!
//! 1. **Connecting:** TCP to the peer's session port (outbound), or an
//!    accepted connection (inbound).
//! 2. **ChannelPending:** a secured channel is negotiated over UDP; the
//!    initiator then names it in a cleartext preamble on the TCP stream.
//! 3. **SessionOpen:** both sides send `Open`. The receiver checks the
//!    claimed identity against the authenticated one, the tier adjacency,
//!    identifier collisions and peer capacity.
//! 4. **Established:** the routing hub pushes a full sync, then incremental
//!    route and service updates. Keepalives hold the session up; silence
//!    for the negotiated hold time closes it.
//!
//! Policy failures (illegal adjacency, identifier collision) end in
//! `Rejected` and are never retried. Everything else returns to `Idle`,
//! and bootstrap peers are retried with capped exponential backoff.
//!
//! ## Withdrawal
//!
//! When a session leaves `Established`, everything learned over it is
//! withdrawn from every other session exactly once.

pub mod adapters;
pub mod domain;
pub mod error;
pub mod service;

pub use domain::{
    BootstrapPeer, Capabilities, NotificationCode, Open, PeerOrigin, SessionEvent, SessionMessage,
    SessionState,
};
pub use error::{ErrorKind, SessionError, SessionResult};
pub use service::{
    EngineConfig, EngineCounters, EngineSnapshot, HubServices, LocalService, PeerEngine,
    RoutingHub, SessionConfig, SessionInfo, DEFAULT_HANDSHAKE_PORT, DEFAULT_SESSION_PORT,
    MIN_HOLD_TIME_SECS,
};
