//! # vx0net Test Suite
//!
//! Multi-node scenarios. Every node is a real [`PeerEngine`] bound to
//! loopback sockets; nothing is mocked below the engine API.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs          # Node fixtures, fast timers, polling helpers
//! └── integration/
//!     ├── hierarchy.rs    # Tier rules, bootstrap lists, route propagation
//!     ├── withdrawal.rs   # Closing sessions and exactly-once withdraw
//!     ├── services.rs     # Service records and the name gate
//!     ├── credentials.rs  # PSK and certificate authentication, rekeying
//!     └── runtime.rs      # Nodes built from TOML configuration
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p vx-tests
//! cargo test -p vx-tests integration::hierarchy::
//! ```
//!
//! [`PeerEngine`]: vx_06_peer_session::PeerEngine

#[cfg(test)]
pub mod harness;
pub mod integration;
