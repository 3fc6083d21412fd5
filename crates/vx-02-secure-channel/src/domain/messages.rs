//! Handshake datagrams.
//!
//! All messages are bincode-encoded with a hard size limit. Field layout is
//! versioned through [`PROTOCOL_VERSION`] in the proposal.

use super::credential::AuthProof;
use crate::error::{ChannelError, ChannelResult};
use bincode::Options;
use serde::{Deserialize, Serialize};
use vx_01_tier_identity::NodeIdentity;

/// Handshake protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest accepted handshake datagram.
pub const MAX_DATAGRAM: usize = 4096;

/// Which credential type the initiator will prove possession of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    PreSharedKey,
    Certificate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub version: u8,
    pub initiator_spi: u64,
    pub ephemeral: [u8; 32],
    pub nonce: [u8; 32],
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReply {
    pub initiator_spi: u64,
    pub responder_spi: u64,
    pub ephemeral: [u8; 32],
    pub nonce: [u8; 32],
}

/// AEAD-sealed [`AuthPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedAuth {
    pub initiator_spi: u64,
    pub responder_spi: u64,
    pub ciphertext: Vec<u8>,
}

/// Identity claim plus proof, carried inside [`SealedAuth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub identity: NodeIdentity,
    pub proof: AuthProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    CoolingDown,
    UnsupportedVersion,
    AuthMethodMismatch,
    AuthenticationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub initiator_spi: u64,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    Proposal(Proposal),
    ProposalReply(ProposalReply),
    Auth(SealedAuth),
    AuthReply(SealedAuth),
    Reject(Reject),
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DATAGRAM as u64)
        .reject_trailing_bytes()
}

impl HandshakeMessage {
    pub fn encode(&self) -> ChannelResult<Vec<u8>> {
        codec().serialize(self).map_err(ChannelError::malformed)
    }

    pub fn decode(bytes: &[u8]) -> ChannelResult<Self> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(ChannelError::malformed("datagram too large"));
        }
        codec().deserialize(bytes).map_err(ChannelError::malformed)
    }

    /// SPI of the side that started the exchange; demultiplexes replies.
    pub fn initiator_spi(&self) -> u64 {
        match self {
            HandshakeMessage::Proposal(m) => m.initiator_spi,
            HandshakeMessage::ProposalReply(m) => m.initiator_spi,
            HandshakeMessage::Auth(m) | HandshakeMessage::AuthReply(m) => m.initiator_spi,
            HandshakeMessage::Reject(m) => m.initiator_spi,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::Proposal(_) => "Proposal",
            HandshakeMessage::ProposalReply(_) => "ProposalReply",
            HandshakeMessage::Auth(_) => "Auth",
            HandshakeMessage::AuthReply(_) => "AuthReply",
            HandshakeMessage::Reject(_) => "Reject",
        }
    }
}

pub(crate) fn encode_payload(payload: &AuthPayload) -> ChannelResult<Vec<u8>> {
    codec().serialize(payload).map_err(ChannelError::malformed)
}

pub(crate) fn decode_payload(bytes: &[u8]) -> ChannelResult<AuthPayload> {
    codec().deserialize(bytes).map_err(ChannelError::malformed)
}
