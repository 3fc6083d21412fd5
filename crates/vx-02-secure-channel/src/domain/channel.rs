//! Established channel and the sealed frame format.
//!
//! ```text
//! +---------+------------+---------+----------+-------------------+
//! | spi u64 | gen u32    | seq u64 | tag [16] | ciphertext ...    |
//! +---------+------------+---------+----------+-------------------+
//!  \________ associated data ______/
//! ```
//!
//! `ciphertext` is XChaCha20-Poly1305 under the direction's encryption key;
//! `tag` is a truncated BLAKE3 keyed hash of header and ciphertext under the
//! direction's MAC key. Sequence numbers are strictly increasing per
//! generation; a rekey starts a new generation at sequence 1.

use super::handshake::Role;
use super::keys::{rekey_seed, DirectionKeys};
use crate::error::{ChannelError, ChannelResult};
use serde::{Deserialize, Serialize};
use shared_crypto::{keyed_hash, mac_eq, open, seal, Nonce};
use shared_types::Timestamp;
use std::fmt;
use uuid::Uuid;
use vx_01_tier_identity::NodeIdentity;
use zeroize::Zeroize;

const AAD_LEN: usize = 8 + 4 + 8;
const TAG_LEN: usize = 16;

/// Bytes in front of the ciphertext of every frame.
pub const FRAME_HEADER_LEN: usize = AAD_LEN + TAG_LEN;

/// One encrypted, authenticated unit of channel traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedFrame {
    pub spi: u64,
    pub generation: u32,
    pub seq: u64,
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedFrame {
    fn aad(spi: u64, generation: u32, seq: u64) -> [u8; AAD_LEN] {
        let mut aad = [0u8; AAD_LEN];
        aad[..8].copy_from_slice(&spi.to_be_bytes());
        aad[8..12].copy_from_slice(&generation.to_be_bytes());
        aad[12..].copy_from_slice(&seq.to_be_bytes());
        aad
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&Self::aad(self.spi, self.generation, self.seq));
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn decode(bytes: &[u8]) -> ChannelResult<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(ChannelError::malformed(format!(
                "frame of {} bytes shorter than header",
                bytes.len()
            )));
        }
        let (header, ciphertext) = bytes.split_at(FRAME_HEADER_LEN);
        let mut spi = [0u8; 8];
        let mut generation = [0u8; 4];
        let mut seq = [0u8; 8];
        let mut tag = [0u8; TAG_LEN];
        spi.copy_from_slice(&header[..8]);
        generation.copy_from_slice(&header[8..12]);
        seq.copy_from_slice(&header[12..AAD_LEN]);
        tag.copy_from_slice(&header[AAD_LEN..]);
        Ok(Self {
            spi: u64::from_be_bytes(spi),
            generation: u32::from_be_bytes(generation),
            seq: u64::from_be_bytes(seq),
            tag,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Per-channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub rekeys: u32,
}

struct Direction {
    seed: [u8; 32],
    keys: DirectionKeys,
    generation: u32,
    /// Last sequence number sent or accepted in this generation.
    seq: u64,
}

impl Direction {
    fn new(seed: [u8; 32]) -> Self {
        Self {
            keys: DirectionKeys::from_seed(&seed),
            seed,
            generation: 0,
            seq: 0,
        }
    }

    fn rekey(&mut self, nonce: &[u8; 32]) -> ChannelResult<()> {
        let generation = self
            .generation
            .checked_add(1)
            .ok_or(ChannelError::SequenceExhausted)?;
        let next = rekey_seed(&self.seed, nonce);
        self.seed.zeroize();
        self.seed = next;
        self.keys = DirectionKeys::from_seed(&self.seed);
        self.generation = generation;
        self.seq = 0;
        Ok(())
    }

    fn tag(&self, aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut input = Vec::with_capacity(aad.len() + ciphertext.len());
        input.extend_from_slice(aad);
        input.extend_from_slice(ciphertext);
        let full = keyed_hash(self.keys.mac(), &input);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&full[..TAG_LEN]);
        tag
    }
}

impl Drop for Direction {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// Authenticated, encrypted association with one peer.
///
/// Produced only by a completed [`Handshake`](super::Handshake); there is no
/// way to send or receive traffic without one.
pub struct SecureChannel {
    id: Uuid,
    role: Role,
    local_spi: u64,
    remote_spi: u64,
    peer: NodeIdentity,
    send: Direction,
    recv: Direction,
    stats: TrafficStats,
    established_at: Timestamp,
}

impl SecureChannel {
    pub(crate) fn new(
        role: Role,
        local_spi: u64,
        remote_spi: u64,
        peer: NodeIdentity,
        send_seed: [u8; 32],
        recv_seed: [u8; 32],
        established_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            local_spi,
            remote_spi,
            peer,
            send: Direction::new(send_seed),
            recv: Direction::new(recv_seed),
            stats: TrafficStats::default(),
            established_at,
        }
    }

    /// Encrypt and authenticate `plaintext` for the peer.
    pub fn seal(&mut self, plaintext: &[u8]) -> ChannelResult<SealedFrame> {
        let seq = self
            .send
            .seq
            .checked_add(1)
            .ok_or(ChannelError::SequenceExhausted)?;
        let generation = self.send.generation;
        let spi = self.remote_spi;
        let aad = SealedFrame::aad(spi, generation, seq);
        let ciphertext = seal(
            self.send.keys.enc(),
            &Nonce::from_counter(generation, seq),
            &aad,
            plaintext,
        )?;
        let tag = self.send.tag(&aad, &ciphertext);
        self.send.seq = seq;
        self.stats.frames_out += 1;
        self.stats.bytes_out += plaintext.len() as u64;
        Ok(SealedFrame {
            spi,
            generation,
            seq,
            tag,
            ciphertext,
        })
    }

    /// Verify and decrypt a frame from the peer.
    ///
    /// State advances only when the frame verifies, so a forged frame cannot
    /// push the replay window forward.
    pub fn open(&mut self, frame: &SealedFrame) -> ChannelResult<Vec<u8>> {
        if frame.spi != self.local_spi {
            return Err(ChannelError::WrongSpi {
                expected: self.local_spi,
                actual: frame.spi,
            });
        }
        if frame.generation != self.recv.generation {
            return Err(ChannelError::GenerationMismatch {
                expected: self.recv.generation,
                actual: frame.generation,
            });
        }
        if frame.seq <= self.recv.seq {
            return Err(ChannelError::Replay {
                seq: frame.seq,
                last: self.recv.seq,
            });
        }
        let aad = SealedFrame::aad(frame.spi, frame.generation, frame.seq);
        if !mac_eq(&self.recv.tag(&aad, &frame.ciphertext), &frame.tag) {
            return Err(ChannelError::FrameAuthFailed);
        }
        let plaintext = open(
            self.recv.keys.enc(),
            &Nonce::from_counter(frame.generation, frame.seq),
            &aad,
            &frame.ciphertext,
        )
        .map_err(|_| ChannelError::FrameAuthFailed)?;
        self.recv.seq = frame.seq;
        self.stats.frames_in += 1;
        self.stats.bytes_in += plaintext.len() as u64;
        Ok(plaintext)
    }

    /// Move the sending direction to a fresh key generation.
    pub fn rekey_send(&mut self, nonce: &[u8; 32]) -> ChannelResult<u32> {
        self.send.rekey(nonce)?;
        self.stats.rekeys += 1;
        Ok(self.send.generation)
    }

    /// Follow the peer's rekey of its sending direction.
    pub fn rekey_recv(&mut self, nonce: &[u8; 32]) -> ChannelResult<u32> {
        self.recv.rekey(nonce)?;
        Ok(self.recv.generation)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_spi(&self) -> u64 {
        self.local_spi
    }

    pub fn remote_spi(&self) -> u64 {
        self.remote_spi
    }

    /// Authenticated identity of the remote node.
    pub fn peer(&self) -> &NodeIdentity {
        &self.peer
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub fn send_generation(&self) -> u32 {
        self.send.generation
    }

    pub fn established_at(&self) -> Timestamp {
        self.established_at
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("local_spi", &format_args!("{:#x}", self.local_spi))
            .field("remote_spi", &format_args!("{:#x}", self.remote_spi))
            .field("peer", &self.peer)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
