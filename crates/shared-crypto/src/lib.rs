//! # Shared Crypto - Channel Cryptography
//!
//! Primitives used by the secured channel handshake and the sealed frame codec.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Handshake payloads and traffic frames |
//! | `hashing` | BLAKE3 | Transcript hash, keyed MAC, key schedule |
//! | `key_exchange` | X25519 | Ephemeral Diffie-Hellman per handshake |
//! | `signatures` | Ed25519 | Node certificates and certificate-based auth |
//!
//! ## Security Properties
//!
//! - **XChaCha20**: 192-bit nonce, constant-time ARX design
//! - **X25519**: ephemeral secrets are consumed by the exchange and cannot be reused
//! - **BLAKE3**: keyed mode doubles as the frame MAC, derive-key mode as the KDF

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod key_exchange;
pub mod signatures;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{derive_key, hash_many, keyed_hash, mac_eq, Hash, TranscriptHasher};
pub use key_exchange::{EphemeralKeyPair, SharedSecret};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
pub use symmetric::{open, seal, Nonce, SecretKey};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
