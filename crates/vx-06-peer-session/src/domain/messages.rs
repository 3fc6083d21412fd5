//! Reachability-exchange messages.
//!
//! Encoded with bincode and always carried inside sealed channel frames.

use crate::error::{SessionError, SessionResult};
use bincode::Options;
use serde::{Deserialize, Serialize};
use vx_01_tier_identity::NodeIdentity;
use vx_03_route_table::RouteDelta;
use vx_04_service_registry::ServiceDelta;

/// Largest encoded session message.
pub const MAX_MESSAGE: usize = 64 * 1024;

/// Optional protocol features a node supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub routes: bool,
    pub services: bool,
    pub rekey: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            routes: true,
            services: true,
            rekey: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Open {
    pub identity: NodeIdentity,
    pub hold_time_secs: u16,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCode {
    /// Orderly close.
    Cease,
    HoldTimerExpired,
    IllegalAdjacency,
    IdentityCollision,
    ProtocolError,
    /// Capacity or duplicate-session refusal.
    ResourceExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMessage {
    Open(Open),
    Keepalive,
    RouteUpdate(RouteDelta),
    ServiceUpdate(ServiceDelta),
    /// Sender switches its sending direction to the next key generation
    /// right after this message.
    Rekey { nonce: [u8; 32] },
    Notification {
        code: NotificationCode,
        reason: String,
    },
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE as u64)
        .reject_trailing_bytes()
}

impl SessionMessage {
    pub fn encode(&self) -> SessionResult<Vec<u8>> {
        codec().serialize(self).map_err(SessionError::codec)
    }

    pub fn decode(bytes: &[u8]) -> SessionResult<Self> {
        if bytes.len() > MAX_MESSAGE {
            return Err(SessionError::FrameTooLarge {
                len: bytes.len(),
                max: MAX_MESSAGE,
            });
        }
        codec().deserialize(bytes).map_err(SessionError::codec)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Open(_) => "Open",
            SessionMessage::Keepalive => "Keepalive",
            SessionMessage::RouteUpdate(_) => "RouteUpdate",
            SessionMessage::ServiceUpdate(_) => "ServiceUpdate",
            SessionMessage::Rekey { .. } => "Rekey",
            SessionMessage::Notification { .. } => "Notification",
        }
    }

    pub fn notification(code: NotificationCode, reason: impl Into<String>) -> Self {
        SessionMessage::Notification {
            code,
            reason: reason.into(),
        }
    }
}
