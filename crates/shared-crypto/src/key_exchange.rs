//! # X25519 Key Exchange
//!
//! Each handshake generates a fresh ephemeral keypair. The secret half is
//! consumed by [`EphemeralKeyPair::diffie_hellman`], so it cannot be used
//! for a second exchange.

use crate::CryptoError;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

/// Ephemeral X25519 keypair.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public value to put on the wire.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Complete the exchange with the peer's public value.
    ///
    /// # Errors
    ///
    /// `NonContributoryExchange` if the peer sent a low-order point.
    pub fn diffie_hellman(self, peer_public: [u8; 32]) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributoryExchange);
        }
        Ok(SharedSecret(shared.to_bytes()))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Raw Diffie-Hellman output. Only ever fed into the key schedule.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
