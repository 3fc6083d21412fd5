//! Node credentials: pre-shared key or root-signed certificate.
//!
//! Both kinds prove the same thing: the sender knows a secret bound to the
//! identity it claims, for this particular handshake transcript.

use super::handshake::Role;
use crate::error::{ChannelError, ChannelResult};
use serde::{Deserialize, Serialize};
use shared_crypto::{
    derive_key, keyed_hash, mac_eq, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, Hash,
    SecretKey, TranscriptHasher,
};
use shared_types::Timestamp;
use std::fmt;
use std::sync::Arc;
use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};

use super::messages::AuthMethod;

const PSK_CONTEXT: &str = "vx0net psk v1";
const AUTH_LABEL: &str = "vx0net auth v1";
const CERT_LABEL: &str = "vx0net certificate v1";

/// Network-wide shared secret, stretched into a 256-bit MAC key.
#[derive(Clone)]
pub struct PreSharedKey(SecretKey);

impl PreSharedKey {
    pub fn new(secret: &str) -> Self {
        Self(SecretKey::from_bytes(derive_key(PSK_CONTEXT, secret.as_bytes())))
    }

    fn mac(&self, input: &Hash) -> Hash {
        keyed_hash(self.0.as_bytes(), input)
    }
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreSharedKey(..)")
    }
}

/// Binds a node's Ed25519 key to its identity, signed by the trust root.
///
/// Chains are one level deep: root -> node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCertificate {
    pub subject: NodeId,
    pub tier: Tier,
    pub name: String,
    pub public_key: [u8; 32],
    pub issuer: String,
    /// Unix seconds after which the certificate is no longer accepted.
    pub not_after: u64,
    pub signature: Vec<u8>,
}

impl NodeCertificate {
    /// Sign a certificate for `subject` with the root key.
    pub fn issue(
        root: &Ed25519KeyPair,
        issuer: impl Into<String>,
        subject: &NodeIdentity,
        public_key: Ed25519PublicKey,
        not_after: Timestamp,
    ) -> Self {
        let mut certificate = Self {
            subject: subject.id(),
            tier: subject.tier(),
            name: subject.name().to_string(),
            public_key: *public_key.as_bytes(),
            issuer: issuer.into(),
            not_after: not_after.as_secs(),
            signature: Vec::new(),
        };
        certificate.signature = root.sign(&certificate.signed_bytes()).as_bytes().to_vec();
        certificate
    }

    fn signed_bytes(&self) -> Hash {
        let mut hasher = TranscriptHasher::new(CERT_LABEL);
        hasher
            .append(&self.subject.value().to_be_bytes())
            .append(self.tier.as_str().as_bytes())
            .append(self.name.as_bytes())
            .append(&self.public_key)
            .append(self.issuer.as_bytes())
            .append(&self.not_after.to_be_bytes());
        hasher.finalize()
    }

    /// Check the root signature and the validity window.
    pub fn verify(&self, root: &Ed25519PublicKey, now: Timestamp) -> ChannelResult<()> {
        if now.as_secs() > self.not_after {
            return Err(auth_failed(format!(
                "certificate for node {} expired",
                self.subject
            )));
        }
        let signature = Ed25519Signature::from_slice(&self.signature)
            .map_err(|_| auth_failed("malformed certificate signature"))?;
        root.verify(&self.signed_bytes(), &signature)
            .map_err(|_| auth_failed("certificate not signed by trust root"))
    }

    /// Whether the certificate names exactly this identity.
    pub fn covers(&self, identity: &NodeIdentity) -> bool {
        self.subject == identity.id() && self.tier == identity.tier() && self.name == identity.name()
    }
}

/// Certificate, its private key and the root it chains to.
pub struct CertificateCredential {
    certificate: NodeCertificate,
    key: Ed25519KeyPair,
    trust_root: Ed25519PublicKey,
}

impl CertificateCredential {
    /// Fails if `key` does not match the certificate's public key.
    pub fn new(
        certificate: NodeCertificate,
        key: Ed25519KeyPair,
        trust_root: Ed25519PublicKey,
    ) -> ChannelResult<Self> {
        if key.public_key().as_bytes() != &certificate.public_key {
            return Err(auth_failed("private key does not match certificate"));
        }
        Ok(Self {
            certificate,
            key,
            trust_root,
        })
    }

    pub fn certificate(&self) -> &NodeCertificate {
        &self.certificate
    }

    pub fn trust_root(&self) -> &Ed25519PublicKey {
        &self.trust_root
    }
}

impl fmt::Debug for CertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCredential")
            .field("subject", &self.certificate.subject)
            .field("issuer", &self.certificate.issuer)
            .finish_non_exhaustive()
    }
}

/// Proof carried in the sealed auth payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthProof {
    PreSharedKey { mac: [u8; 32] },
    Certificate {
        certificate: NodeCertificate,
        signature: Vec<u8>,
    },
}

/// The local node's credential.
#[derive(Debug, Clone)]
pub enum Credential {
    PreSharedKey(PreSharedKey),
    Certificate(Arc<CertificateCredential>),
}

impl Credential {
    pub fn psk(secret: &str) -> Self {
        Credential::PreSharedKey(PreSharedKey::new(secret))
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::PreSharedKey(_) => AuthMethod::PreSharedKey,
            Credential::Certificate(_) => AuthMethod::Certificate,
        }
    }

    /// Prove possession for `identity` speaking as `role`.
    pub fn prove(&self, transcript: &Hash, role: Role, identity: &NodeIdentity) -> AuthProof {
        let input = proof_input(transcript, role, identity);
        match self {
            Credential::PreSharedKey(psk) => AuthProof::PreSharedKey {
                mac: psk.mac(&input),
            },
            Credential::Certificate(cred) => AuthProof::Certificate {
                certificate: cred.certificate.clone(),
                signature: cred.key.sign(&input).as_bytes().to_vec(),
            },
        }
    }

    /// Verify a peer's proof for the identity it claimed as `role`.
    pub fn verify(
        &self,
        proof: &AuthProof,
        transcript: &Hash,
        role: Role,
        identity: &NodeIdentity,
        now: Timestamp,
    ) -> ChannelResult<()> {
        let input = proof_input(transcript, role, identity);
        match (self, proof) {
            (Credential::PreSharedKey(psk), AuthProof::PreSharedKey { mac }) => {
                if mac_eq(&psk.mac(&input), mac) {
                    Ok(())
                } else {
                    Err(auth_failed("pre-shared key proof mismatch"))
                }
            }
            (
                Credential::Certificate(cred),
                AuthProof::Certificate {
                    certificate,
                    signature,
                },
            ) => {
                certificate.verify(&cred.trust_root, now)?;
                if !certificate.covers(identity) {
                    return Err(auth_failed(format!(
                        "certificate for {} does not cover {identity}",
                        certificate.subject
                    )));
                }
                let key = Ed25519PublicKey::from_bytes(certificate.public_key)
                    .map_err(|_| auth_failed("certificate carries an invalid key"))?;
                let signature = Ed25519Signature::from_slice(signature)
                    .map_err(|_| auth_failed("malformed transcript signature"))?;
                key.verify(&input, &signature)
                    .map_err(|_| auth_failed("transcript signature invalid"))
            }
            _ => Err(auth_failed("authentication method mismatch")),
        }
    }
}

fn proof_input(transcript: &Hash, role: Role, identity: &NodeIdentity) -> Hash {
    let mut hasher = TranscriptHasher::new(AUTH_LABEL);
    hasher
        .append(transcript)
        .append(role.as_str().as_bytes())
        .append(&identity.id().value().to_be_bytes())
        .append(identity.tier().as_str().as_bytes())
        .append(identity.name().as_bytes())
        .append(identity.address().to_string().as_bytes());
    hasher.finalize()
}

fn auth_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::AuthenticationFailed {
        reason: reason.into(),
    }
}
