//! # Secured Channel Manager
//!
//! **Subsystem ID:** 2
//!
//! Establishes one authenticated, encrypted channel per peer relationship
//! before any routing data is exchanged.
//!
//! ## Handshake (UDP, default port 4500)
//!
//! ```text
//! Initiator                                   Responder
//!   | Proposal {spi_i, X25519 e_i, n_i}          |
//!   |------------------------------------------->|
//!   |    ProposalReply {spi_i, spi_r, e_r, n_r}  |
//!   |<-------------------------------------------|
//!   |  both: dh = X25519(e, e'), seed = KDF(dh, transcript)
//!   | Auth  AEAD_i2r{identity_i, proof_i}        |
//!   |------------------------------------------->|
//!   |    AuthReply  AEAD_r2i{identity_r, proof_r}|
//!   |<-------------------------------------------|
//!   |  both: install directional traffic keys    |
//! ```
//!
//! Proofs are either a BLAKE3 keyed MAC under the pre-shared key or an
//! Ed25519 signature backed by a certificate from the trusted root; both
//! cover the transcript hash and the claimed identity.
//!
//! ## Traffic
//!
//! After the handshake every byte travels in a [`SealedFrame`]:
//! XChaCha20-Poly1305 under the direction's encryption key plus a BLAKE3
//! MAC under its separate authentication key. There is no plaintext mode.
//!
//! ## Failure handling
//!
//! - Proposal timeout: retried with capped exponential backoff.
//! - Authentication failure or key-derivation mismatch: the remote address
//!   is cooled down for a configurable window.
//! - Rekey failure: the channel is torn down by its owner.

pub mod domain;
pub mod error;
pub mod service;

pub use domain::{
    AuthMethod, CertificateCredential, ChannelSeed, Credential, Handshake, HandshakeMessage,
    LocalParams, NodeCertificate, PreSharedKey, Role, SealedFrame, SecureChannel, TrafficStats,
    CooldownList, FRAME_HEADER_LEN,
};
pub use error::{ChannelError, ChannelResult};
pub use service::{ChannelConfig, ChannelManager, ChannelStats};
