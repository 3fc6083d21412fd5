//! Domain layer: wire messages, credentials, key schedule, the handshake
//! state machine and established channels.

mod channel;
mod cooldown;
mod credential;
mod handshake;
mod keys;
mod messages;

pub use channel::{SealedFrame, SecureChannel, TrafficStats, FRAME_HEADER_LEN};
pub use cooldown::{CooldownEntry, CooldownList};
pub use credential::{
    AuthProof, CertificateCredential, Credential, NodeCertificate, PreSharedKey,
};
pub use handshake::{Handshake, LocalParams, Role};
pub use keys::{ChannelSeed, DirectionKeys};
pub use messages::{
    AuthMethod, AuthPayload, HandshakeMessage, Proposal, ProposalReply, Reject, RejectReason,
    SealedAuth, MAX_DATAGRAM, PROTOCOL_VERSION,
};
