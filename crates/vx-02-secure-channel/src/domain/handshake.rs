//! Handshake state machine.
//!
//! Pure: it consumes and produces [`HandshakeMessage`]s and never touches a
//! socket. The channel manager drives it from datagrams.
//!
//! ```text
//! Initiator: ProposalSent --reply--> AuthSent --auth reply--> Established
//! Responder: (proposal) --> ReplySent --auth--> Established
//! any error ------------------------------------------> Failed(reason)
//! ```

use super::channel::SecureChannel;
use super::credential::Credential;
use super::keys::ChannelSeed;
use super::messages::{
    decode_payload, encode_payload, AuthPayload, HandshakeMessage, Proposal, ProposalReply,
    RejectReason, SealedAuth, PROTOCOL_VERSION,
};
use crate::error::{ChannelError, ChannelResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared_crypto::{open, seal, EphemeralKeyPair, Hash, Nonce, TranscriptHasher};
use shared_types::{SystemTimeSource, TimeSource};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use vx_01_tier_identity::{NodeId, NodeIdentity};

/// Which side of the exchange this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Identity and credential of the local node, shared by all handshakes.
#[derive(Clone)]
pub struct LocalParams {
    identity: NodeIdentity,
    credential: Credential,
    time: Arc<dyn TimeSource>,
}

impl LocalParams {
    pub fn new(identity: NodeIdentity, credential: Credential) -> Self {
        Self {
            identity,
            credential,
            time: Arc::new(SystemTimeSource::new()),
        }
    }

    /// Replace the clock used for certificate expiry checks.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

impl fmt::Debug for LocalParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalParams")
            .field("identity", &self.identity)
            .field("credential", &self.credential.method())
            .finish_non_exhaustive()
    }
}

enum State {
    ProposalSent {
        keypair: EphemeralKeyPair,
        proposal: Proposal,
    },
    AuthSent {
        seed: ChannelSeed,
        transcript: Hash,
        responder_spi: u64,
    },
    ReplySent {
        seed: ChannelSeed,
        transcript: Hash,
        initiator_spi: u64,
    },
    Established,
    Failed { reason: String },
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ProposalSent { .. } => "ProposalSent",
            State::AuthSent { .. } => "AuthSent",
            State::ReplySent { .. } => "ReplySent",
            State::Established => "Established",
            State::Failed { .. } => "Failed",
        }
    }
}

/// One in-flight key exchange.
pub struct Handshake {
    role: Role,
    local: LocalParams,
    expected_peer: Option<NodeId>,
    local_spi: u64,
    state: State,
}

impl Handshake {
    /// Start an exchange. `expected_peer`, when set, is the only identity
    /// the responder may authenticate as.
    pub fn initiate(local: LocalParams, expected_peer: Option<NodeId>) -> (Self, HandshakeMessage) {
        let keypair = EphemeralKeyPair::generate();
        let proposal = Proposal {
            version: PROTOCOL_VERSION,
            initiator_spi: random_spi(),
            ephemeral: keypair.public_bytes(),
            nonce: random_nonce(),
            auth_method: local.credential.method(),
        };
        let message = HandshakeMessage::Proposal(proposal.clone());
        let handshake = Self {
            role: Role::Initiator,
            local,
            expected_peer,
            local_spi: proposal.initiator_spi,
            state: State::ProposalSent { keypair, proposal },
        };
        (handshake, message)
    }

    /// Answer a proposal. The shared secret is computed immediately, so the
    /// responder holds no ephemeral secret while waiting for the auth message.
    pub fn respond(local: LocalParams, proposal: &Proposal) -> ChannelResult<(Self, HandshakeMessage)> {
        if proposal.version != PROTOCOL_VERSION {
            return Err(ChannelError::Rejected {
                reason: RejectReason::UnsupportedVersion,
            });
        }
        if proposal.auth_method != local.credential.method() {
            return Err(ChannelError::Rejected {
                reason: RejectReason::AuthMethodMismatch,
            });
        }
        let keypair = EphemeralKeyPair::generate();
        let reply = ProposalReply {
            initiator_spi: proposal.initiator_spi,
            responder_spi: random_spi(),
            ephemeral: keypair.public_bytes(),
            nonce: random_nonce(),
        };
        let transcript = transcript(proposal, &reply);
        let shared = keypair.diffie_hellman(proposal.ephemeral)?;
        let seed = ChannelSeed::derive(&shared, &transcript);
        let handshake = Self {
            role: Role::Responder,
            local,
            expected_peer: None,
            local_spi: reply.responder_spi,
            state: State::ReplySent {
                seed,
                transcript,
                initiator_spi: proposal.initiator_spi,
            },
        };
        Ok((handshake, HandshakeMessage::ProposalReply(reply)))
    }

    /// Initiator: process the responder's reply, produce the auth message.
    pub fn on_reply(&mut self, reply: &ProposalReply) -> ChannelResult<HandshakeMessage> {
        let result = self.handle_reply(reply);
        self.record_failure(&result);
        result
    }

    /// Responder: verify the initiator's auth message and answer it.
    pub fn on_auth(&mut self, auth: &SealedAuth) -> ChannelResult<(HandshakeMessage, SecureChannel)> {
        let result = self.handle_auth(auth);
        self.record_failure(&result);
        result
    }

    /// Initiator: verify the responder's auth reply.
    pub fn on_auth_reply(&mut self, reply: &SealedAuth) -> ChannelResult<SecureChannel> {
        let result = self.handle_auth_reply(reply);
        self.record_failure(&result);
        result
    }

    fn handle_reply(&mut self, reply: &ProposalReply) -> ChannelResult<HandshakeMessage> {
        let (keypair, proposal) = match std::mem::replace(&mut self.state, failed()) {
            State::ProposalSent { keypair, proposal } => (keypair, proposal),
            other => return Err(self.unexpected(other, "ProposalReply")),
        };
        if reply.initiator_spi != proposal.initiator_spi {
            self.state = State::ProposalSent { keypair, proposal };
            return Err(ChannelError::WrongSpi {
                expected: self.local_spi,
                actual: reply.initiator_spi,
            });
        }
        let transcript = transcript(&proposal, reply);
        let shared = keypair.diffie_hellman(reply.ephemeral)?;
        let seed = ChannelSeed::derive(&shared, &transcript);
        let sealed = self.seal_auth(&seed, &transcript, reply.initiator_spi, reply.responder_spi)?;
        self.state = State::AuthSent {
            seed,
            transcript,
            responder_spi: reply.responder_spi,
        };
        Ok(HandshakeMessage::Auth(sealed))
    }

    fn handle_auth(&mut self, auth: &SealedAuth) -> ChannelResult<(HandshakeMessage, SecureChannel)> {
        let (seed, transcript, initiator_spi) =
            match std::mem::replace(&mut self.state, failed()) {
                State::ReplySent {
                    seed,
                    transcript,
                    initiator_spi,
                } => (seed, transcript, initiator_spi),
                other => return Err(self.unexpected(other, "Auth")),
            };
        if auth.initiator_spi != initiator_spi || auth.responder_spi != self.local_spi {
            return Err(ChannelError::WrongSpi {
                expected: self.local_spi,
                actual: auth.responder_spi,
            });
        }
        let peer = self.open_auth(&seed, &transcript, auth, Role::Initiator)?;
        let sealed = self.seal_auth(&seed, &transcript, initiator_spi, self.local_spi)?;
        let channel = self.establish(&seed, initiator_spi, peer);
        Ok((HandshakeMessage::AuthReply(sealed), channel))
    }

    fn handle_auth_reply(&mut self, reply: &SealedAuth) -> ChannelResult<SecureChannel> {
        let (seed, transcript, responder_spi) =
            match std::mem::replace(&mut self.state, failed()) {
                State::AuthSent {
                    seed,
                    transcript,
                    responder_spi,
                } => (seed, transcript, responder_spi),
                other => return Err(self.unexpected(other, "AuthReply")),
            };
        if reply.initiator_spi != self.local_spi || reply.responder_spi != responder_spi {
            return Err(ChannelError::WrongSpi {
                expected: responder_spi,
                actual: reply.responder_spi,
            });
        }
        let peer = self.open_auth(&seed, &transcript, reply, Role::Responder)?;
        Ok(self.establish(&seed, responder_spi, peer))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_spi(&self) -> u64 {
        self.local_spi
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established)
    }

    /// Why the exchange failed, once it has.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            State::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    fn record_failure<T>(&mut self, result: &ChannelResult<T>) {
        if let (Err(e), State::Failed { reason }) = (result, &mut self.state) {
            if reason.is_empty() {
                *reason = e.to_string();
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed { .. })
    }

    /// The proposal to retransmit while no reply has arrived.
    pub fn pending_proposal(&self) -> Option<HandshakeMessage> {
        match &self.state {
            State::ProposalSent { proposal, .. } => {
                Some(HandshakeMessage::Proposal(proposal.clone()))
            }
            _ => None,
        }
    }

    fn unexpected(&mut self, state: State, message: &'static str) -> ChannelError {
        let name = state.name();
        self.state = state;
        ChannelError::UnexpectedMessage {
            state: name,
            message,
        }
    }

    fn seal_auth(
        &self,
        seed: &ChannelSeed,
        transcript: &Hash,
        initiator_spi: u64,
        responder_spi: u64,
    ) -> ChannelResult<SealedAuth> {
        let payload = AuthPayload {
            identity: self.local.identity.clone(),
            proof: self
                .local
                .credential
                .prove(transcript, self.role, &self.local.identity),
        };
        let plaintext = encode_payload(&payload)?;
        let ciphertext = seal(
            &seed.handshake_key(self.role),
            &Nonce::from_counter(0, 0),
            &auth_aad(initiator_spi, responder_spi),
            &plaintext,
        )?;
        Ok(SealedAuth {
            initiator_spi,
            responder_spi,
            ciphertext,
        })
    }

    fn open_auth(
        &self,
        seed: &ChannelSeed,
        transcript: &Hash,
        sealed: &SealedAuth,
        sender: Role,
    ) -> ChannelResult<NodeIdentity> {
        let plaintext = open(
            &seed.handshake_key(sender),
            &Nonce::from_counter(0, 0),
            &auth_aad(sealed.initiator_spi, sealed.responder_spi),
            &sealed.ciphertext,
        )
        .map_err(|_| ChannelError::KeyDerivationMismatch)?;
        let payload = decode_payload(&plaintext)?;
        payload.identity.validate()?;
        self.local.credential.verify(
            &payload.proof,
            transcript,
            sender,
            &payload.identity,
            self.local.time.now(),
        )?;
        if let Some(expected) = self.expected_peer {
            if payload.identity.id() != expected {
                return Err(ChannelError::UnexpectedIdentity {
                    expected,
                    actual: payload.identity.id(),
                });
            }
        }
        Ok(payload.identity)
    }

    fn establish(&mut self, seed: &ChannelSeed, remote_spi: u64, peer: NodeIdentity) -> SecureChannel {
        debug!(
            role = self.role.as_str(),
            local_spi = self.local_spi,
            remote_spi,
            peer = %peer,
            "[vx-02] Handshake complete"
        );
        self.state = State::Established;
        SecureChannel::new(
            self.role,
            self.local_spi,
            remote_spi,
            peer,
            seed.traffic_seed(self.role),
            seed.traffic_seed(self.role.peer()),
            self.local.time.now(),
        )
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("local_spi", &format_args!("{:#x}", self.local_spi))
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

fn failed() -> State {
    State::Failed {
        reason: String::new(),
    }
}

fn transcript(proposal: &Proposal, reply: &ProposalReply) -> Hash {
    let mut hasher = TranscriptHasher::new("vx0net handshake v1");
    hasher
        .append(&[proposal.version])
        .append(&proposal.initiator_spi.to_be_bytes())
        .append(&reply.responder_spi.to_be_bytes())
        .append(&proposal.ephemeral)
        .append(&reply.ephemeral)
        .append(&proposal.nonce)
        .append(&reply.nonce)
        .append(&[proposal.auth_method as u8]);
    hasher.finalize()
}

fn auth_aad(initiator_spi: u64, responder_spi: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&initiator_spi.to_be_bytes());
    aad[8..].copy_from_slice(&responder_spi.to_be_bytes());
    aad
}

/// Non-zero random SPI; zero is never a valid channel.
fn random_spi() -> u64 {
    loop {
        let spi = rand::thread_rng().next_u64();
        if spi != 0 {
            return spi;
        }
    }
}

fn random_nonce() -> [u8; 32] {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
