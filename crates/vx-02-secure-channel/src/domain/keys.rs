//! Key schedule.
//!
//! ```text
//! seed          = KDF("vx0net channel seed v1", dh || transcript)
//! auth key      = KDF("vx0net handshake {i2r|r2i} v1", seed)
//! traffic seed  = KDF("vx0net traffic {i2r|r2i} v1", seed)
//! enc / mac     = KDF("vx0net frame {enc|mac} v1", traffic seed)
//! rekey         : traffic seed' = KDF("vx0net rekey v1", traffic seed || nonce)
//! ```
//!
//! Each direction has its own encryption and authentication keys.

use super::handshake::Role;
use shared_crypto::{derive_key, Hash, SecretKey, SharedSecret};
use zeroize::Zeroize;

/// Root secret of one channel, derived from the DH output and transcript.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct ChannelSeed([u8; 32]);

impl ChannelSeed {
    pub fn derive(shared: &SharedSecret, transcript: &Hash) -> Self {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(shared.as_bytes());
        material[32..].copy_from_slice(transcript);
        let seed = derive_key("vx0net channel seed v1", &material);
        material.zeroize();
        Self(seed)
    }

    /// Key sealing the auth payload sent by `sender`.
    pub(crate) fn handshake_key(&self, sender: Role) -> SecretKey {
        let context = match sender {
            Role::Initiator => "vx0net handshake i2r v1",
            Role::Responder => "vx0net handshake r2i v1",
        };
        SecretKey::from_bytes(derive_key(context, &self.0))
    }

    /// Traffic seed for frames sent by `sender`.
    pub(crate) fn traffic_seed(&self, sender: Role) -> [u8; 32] {
        let context = match sender {
            Role::Initiator => "vx0net traffic i2r v1",
            Role::Responder => "vx0net traffic r2i v1",
        };
        derive_key(context, &self.0)
    }
}

/// Encryption and MAC keys of one direction.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct DirectionKeys {
    enc: SecretKey,
    mac: [u8; 32],
}

impl DirectionKeys {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            enc: SecretKey::from_bytes(derive_key("vx0net frame enc v1", seed)),
            mac: derive_key("vx0net frame mac v1", seed),
        }
    }

    pub fn enc(&self) -> &SecretKey {
        &self.enc
    }

    pub fn mac(&self) -> &[u8; 32] {
        &self.mac
    }
}

pub(crate) fn rekey_seed(seed: &[u8; 32], nonce: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 64];
    material[..32].copy_from_slice(seed);
    material[32..].copy_from_slice(nonce);
    let next = derive_key("vx0net rekey v1", &material);
    material.zeroize();
    next
}
