//! Session error taxonomy.
//!
//! Every error maps to one [`ErrorKind`], which decides what happens to the
//! peer relationship: transport and handshake failures are retried after
//! backoff, protocol errors tear the session down, policy violations end in
//! `Rejected` for good, resource errors refuse the session.

use crate::domain::{NotificationCode, SessionState};
use serde::Serialize;
use thiserror::Error;
use vx_01_tier_identity::{IdentityError, NodeId, Tier};
use vx_02_secure_channel::ChannelError;
use vx_03_route_table::RouteError;
use vx_04_service_registry::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Transport,
    Handshake,
    Protocol,
    Policy,
    Resource,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect, preamble or Open did not complete in time
    #[error("timed out waiting for {stage}")]
    Timeout { stage: &'static str },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Undecodable session message
    #[error("malformed session message: {reason}")]
    Codec { reason: String },

    /// Length prefix beyond the frame limit
    #[error("frame of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Event not valid in the current state
    #[error("event {event} not valid in state {state}")]
    InvalidTransition {
        state: SessionState,
        event: &'static str,
    },

    /// Remote broke the message sequence or sent inconsistent data
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("invalid identity in Open: {0}")]
    Identity(#[from] IdentityError),

    #[error("invalid route update: {0}")]
    Route(#[from] RouteError),

    #[error("invalid service update: {0}")]
    Registry(#[from] RegistryError),

    /// Tier pair may not hold a direct session
    #[error("adjacency {local} <-> {remote} is not permitted")]
    IllegalAdjacency { local: Tier, remote: Tier },

    /// Bootstrap entry names an identifier outside every tier range
    #[error("identifier {id} belongs to no tier")]
    UnknownTier { id: NodeId },

    /// Remote claims our identifier or one already held by another address
    #[error("identifier {id} already in use")]
    IdentityCollision { id: NodeId },

    /// A second session to the same node from the same address
    #[error("already holding a session with {id}")]
    DuplicateSession { id: NodeId },

    /// Local tier's peer capacity reached
    #[error("peer capacity of {tier} tier ({max}) reached")]
    CapacityExceeded { tier: Tier, max: usize },

    #[error("hold timer expired after {secs}s")]
    HoldTimerExpired { secs: u64 },

    /// Remote ended the session with a notification
    #[error("peer sent {code:?}: {reason}")]
    RemoteNotification {
        code: NotificationCode,
        reason: String,
    },

    /// Remote closed the connection
    #[error("connection closed by peer")]
    PeerClosed,

    #[error("engine shutting down")]
    Shutdown,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Io(_)
            | SessionError::Timeout { .. }
            | SessionError::PeerClosed
            | SessionError::HoldTimerExpired { .. }
            | SessionError::Shutdown => ErrorKind::Transport,
            SessionError::Channel(e) => match e {
                ChannelError::Io(_)
                | ChannelError::HandshakeTimeout { .. }
                | ChannelError::Shutdown => ErrorKind::Transport,
                _ => ErrorKind::Handshake,
            },
            SessionError::Codec { .. }
            | SessionError::FrameTooLarge { .. }
            | SessionError::InvalidTransition { .. }
            | SessionError::Protocol { .. }
            | SessionError::Identity(_)
            | SessionError::Route(_)
            | SessionError::Registry(_) => ErrorKind::Protocol,
            SessionError::IllegalAdjacency { .. } | SessionError::UnknownTier { .. } => {
                ErrorKind::Policy
            }
            SessionError::IdentityCollision { .. }
            | SessionError::DuplicateSession { .. }
            | SessionError::CapacityExceeded { .. } => ErrorKind::Resource,
            SessionError::RemoteNotification { code, .. } => match code {
                NotificationCode::IllegalAdjacency => ErrorKind::Policy,
                NotificationCode::IdentityCollision | NotificationCode::ResourceExhausted => {
                    ErrorKind::Resource
                }
                NotificationCode::ProtocolError => ErrorKind::Protocol,
                NotificationCode::Cease | NotificationCode::HoldTimerExpired => {
                    ErrorKind::Transport
                }
            },
        }
    }

    /// Notification to send the peer before closing, if any.
    pub fn notification(&self) -> Option<NotificationCode> {
        match self {
            SessionError::IllegalAdjacency { .. } => Some(NotificationCode::IllegalAdjacency),
            SessionError::IdentityCollision { .. } => Some(NotificationCode::IdentityCollision),
            SessionError::DuplicateSession { .. } | SessionError::CapacityExceeded { .. } => {
                Some(NotificationCode::ResourceExhausted)
            }
            SessionError::HoldTimerExpired { .. } => Some(NotificationCode::HoldTimerExpired),
            SessionError::Shutdown => Some(NotificationCode::Cease),
            SessionError::RemoteNotification { .. } | SessionError::PeerClosed => None,
            _ if self.kind() == ErrorKind::Protocol => Some(NotificationCode::ProtocolError),
            _ => None,
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        SessionError::Protocol {
            reason: reason.into(),
        }
    }

    pub(crate) fn codec(reason: impl std::fmt::Display) -> Self {
        SessionError::Codec {
            reason: reason.to_string(),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
