//! # Integration Scenarios
//!
//! Each module starts two to four nodes on loopback and checks what the
//! operator would observe through `PeerEngine`: session states, the merged
//! route table, the service registry, name resolution and counters.

pub mod credentials;
pub mod hierarchy;
pub mod runtime;
pub mod services;
pub mod withdrawal;
