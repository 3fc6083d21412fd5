//! Error types for the secured channel layer.

use crate::domain::RejectReason;
use shared_crypto::CryptoError;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use vx_01_tier_identity::{IdentityError, NodeId};

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Socket failure
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram or frame could not be decoded
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// No answer after every retry
    #[error("handshake with {remote} timed out after {attempts} attempts")]
    HandshakeTimeout { remote: SocketAddr, attempts: u32 },

    /// Proof did not verify
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Peer's sealed auth payload did not open under the derived key
    #[error("key derivation mismatch")]
    KeyDerivationMismatch,

    /// Peer authenticated as a different node than configured
    #[error("expected node {expected}, peer authenticated as {actual}")]
    UnexpectedIdentity { expected: NodeId, actual: NodeId },

    /// Remote address is cooling down after an authentication failure
    #[error("{address} is cooling down after an authentication failure")]
    CoolingDown { address: IpAddr },

    /// Remote refused the handshake
    #[error("handshake rejected by peer: {reason:?}")]
    Rejected { reason: RejectReason },

    /// Message arrived in a state that does not expect it
    #[error("unexpected {message} in handshake state {state}")]
    UnexpectedMessage {
        state: &'static str,
        message: &'static str,
    },

    /// Frame addressed to another channel
    #[error("frame for spi {actual:#x}, channel is {expected:#x}")]
    WrongSpi { expected: u64, actual: u64 },

    /// Frame sealed under a key generation this side has not installed
    #[error("frame generation {actual}, expected {expected}")]
    GenerationMismatch { expected: u32, actual: u32 },

    /// Sequence number not strictly increasing
    #[error("replayed or reordered frame: seq {seq}, last accepted {last}")]
    Replay { seq: u64, last: u64 },

    /// Frame MAC did not verify
    #[error("frame authentication failed")]
    FrameAuthFailed,

    /// Counter space of the current key generation used up
    #[error("sequence space exhausted; rekey required")]
    SequenceExhausted,

    /// No channel completed for this SPI in time
    #[error("no established channel for spi {spi:#x}")]
    UnknownChannel { spi: u64 },

    /// Channel manager is shutting down
    #[error("channel manager shut down")]
    Shutdown,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ChannelError {
    /// Failures that put the remote address on the cooldown list.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ChannelError::AuthenticationFailed { .. }
                | ChannelError::KeyDerivationMismatch
                | ChannelError::UnexpectedIdentity { .. }
                | ChannelError::Identity(_)
        )
    }

    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        ChannelError::Malformed {
            reason: reason.to_string(),
        }
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
