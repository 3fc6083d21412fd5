//! # BLAKE3 Hashing
//!
//! One primitive, three modes: plain hashing for handshake transcripts,
//! keyed hashing for frame MACs and PSK proofs, derive-key for the channel
//! key schedule.

/// BLAKE3 hash output (256-bit).
pub type Hash = [u8; 32];

/// Incremental hasher for handshake transcripts.
///
/// Every field is length-prefixed so that two different message sequences
/// can never produce the same byte stream.
pub struct TranscriptHasher {
    inner: blake3::Hasher,
}

impl TranscriptHasher {
    /// Start a transcript bound to a protocol label.
    pub fn new(label: &str) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(&(label.len() as u64).to_be_bytes());
        inner.update(label.as_bytes());
        Self { inner }
    }

    /// Append a field.
    pub fn append(&mut self, field: &[u8]) -> &mut Self {
        self.inner.update(&(field.len() as u64).to_be_bytes());
        self.inner.update(field);
        self
    }

    /// Current transcript hash; the hasher stays usable.
    pub fn finalize(&self) -> Hash {
        *self.inner.finalize().as_bytes()
    }
}

/// Hash several inputs as one stream.
pub fn hash_many(inputs: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for input in inputs {
        hasher.update(input);
    }
    *hasher.finalize().as_bytes()
}

/// Keyed hash (MAC).
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> Hash {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Derive a 256-bit key from a context string and input key material.
///
/// Context strings must be hard-coded and unique per purpose.
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, key_material)
}

/// Constant-time comparison of two MAC tags.
pub fn mac_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
