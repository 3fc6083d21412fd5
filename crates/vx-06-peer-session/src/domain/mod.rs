//! Domain layer: session state machine, wire messages and peer checks.

mod messages;
mod peer;
mod state;

pub use messages::{Capabilities, NotificationCode, Open, SessionMessage, MAX_MESSAGE};
pub use peer::{
    check_adjacency, check_open_identity, keepalive_interval, negotiate_hold_time, BootstrapPeer,
    PeerOrigin,
};
pub use state::{SessionEvent, SessionState};
