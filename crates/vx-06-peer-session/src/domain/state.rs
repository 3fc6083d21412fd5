//! Session lifecycle.
//!
//! ```text
//! Idle --Start--> Connecting --TransportReady--> ChannelPending
//!      --ChannelEstablished--> SessionOpen --OpenAccepted--> Established
//!
//! Connecting | ChannelPending | SessionOpen | Established --Failure/Close--> Closing
//! Established --HoldExpired--> Closing --Released--> Idle
//! Idle | SessionOpen --AdjacencyViolation--> Rejected
//! SessionOpen --IdentityCollision--> Rejected
//! ```
//!
//! `Rejected` is terminal. Transitions not listed in [`SessionState::on`]
//! are errors.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    ChannelPending,
    SessionOpen,
    Established,
    Closing,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Begin an outbound attempt or accept an inbound connection.
    Start,
    /// TCP connected (outbound) or preamble received (inbound).
    TransportReady,
    /// Secured channel authenticated.
    ChannelEstablished,
    /// Both Open messages exchanged and accepted.
    OpenAccepted,
    /// Tier pair may not peer.
    AdjacencyViolation,
    /// Remote identifier collides with ours or another session's.
    IdentityCollision,
    /// Transport, handshake, protocol or resource failure.
    Failure,
    HoldExpired,
    /// Local close or shutdown.
    Close,
    /// Resources released after closing.
    Released,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEvent::Start => "Start",
            SessionEvent::TransportReady => "TransportReady",
            SessionEvent::ChannelEstablished => "ChannelEstablished",
            SessionEvent::OpenAccepted => "OpenAccepted",
            SessionEvent::AdjacencyViolation => "AdjacencyViolation",
            SessionEvent::IdentityCollision => "IdentityCollision",
            SessionEvent::Failure => "Failure",
            SessionEvent::HoldExpired => "HoldExpired",
            SessionEvent::Close => "Close",
            SessionEvent::Released => "Released",
        }
    }
}

impl SessionState {
    /// Next state for `event`, or an error for an invalid pair.
    pub fn on(self, event: SessionEvent) -> SessionResult<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, event) {
            (S::Idle, E::Start) => S::Connecting,
            (S::Idle, E::AdjacencyViolation) => S::Rejected,
            (S::Connecting, E::TransportReady) => S::ChannelPending,
            (S::ChannelPending, E::ChannelEstablished) => S::SessionOpen,
            (S::SessionOpen, E::OpenAccepted) => S::Established,
            (S::SessionOpen, E::AdjacencyViolation | E::IdentityCollision) => S::Rejected,
            (S::Established, E::HoldExpired) => S::Closing,
            (
                S::Connecting | S::ChannelPending | S::SessionOpen | S::Established,
                E::Failure | E::Close,
            ) => S::Closing,
            (S::Closing, E::Released) => S::Idle,
            (state, event) => {
                return Err(SessionError::InvalidTransition {
                    state,
                    event: event.as_str(),
                })
            }
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Rejected
    }

    /// Route and service data may flow only here.
    pub fn exchanges_routes(self) -> bool {
        self == SessionState::Established
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::ChannelPending => "ChannelPending",
            SessionState::SessionOpen => "SessionOpen",
            SessionState::Established => "Established",
            SessionState::Closing => "Closing",
            SessionState::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
