//! `[credential]` section and certificate file loading.
//!
//! Certificate material lives in three files:
//!
//! - `ca_cert_path`: hex-encoded 32-byte Ed25519 public key of the trust root
//! - `node_cert_path`: the node certificate as TOML
//! - `node_key_path`: hex-encoded 32-byte Ed25519 seed matching the certificate

use super::{ConfigError, ConfigResult};
use serde::Deserialize;
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey};
use shared_types::{SystemTimeSource, TimeSource};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vx_01_tier_identity::NodeIdentity;
use vx_02_secure_channel::{CertificateCredential, Credential, NodeCertificate};

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialConfig {
    pub psk: Option<String>,
    pub ca_cert_path: Option<PathBuf>,
    pub node_cert_path: Option<PathBuf>,
    pub node_key_path: Option<PathBuf>,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("psk", &self.psk.as_ref().map(|_| "<redacted>"))
            .field("ca_cert_path", &self.ca_cert_path)
            .field("node_cert_path", &self.node_cert_path)
            .field("node_key_path", &self.node_key_path)
            .finish()
    }
}

impl CredentialConfig {
    /// Exactly one method: a non-empty PSK, or all three certificate paths.
    pub fn check_shape(&self) -> ConfigResult<()> {
        let paths = [
            self.ca_cert_path.is_some(),
            self.node_cert_path.is_some(),
            self.node_key_path.is_some(),
        ];
        let any_path = paths.iter().any(|set| *set);
        let all_paths = paths.iter().all(|set| *set);

        match (&self.psk, any_path) {
            (Some(_), true) => Err(credential_error(
                "set either psk or the certificate paths, not both",
            )),
            (Some(psk), false) if psk.is_empty() => Err(credential_error("psk is empty")),
            (Some(_), false) => Ok(()),
            (None, _) if all_paths => Ok(()),
            (None, true) => Err(credential_error(
                "ca_cert_path, node_cert_path and node_key_path must all be set",
            )),
            (None, false) => Err(credential_error("no psk and no certificate configured")),
        }
    }

    /// Build the runtime credential for `identity`, reading certificate
    /// files relative to `base_dir`.
    pub fn load(&self, identity: &NodeIdentity, base_dir: Option<&Path>) -> ConfigResult<Credential> {
        self.check_shape()?;
        if let Some(psk) = &self.psk {
            return Ok(Credential::psk(psk));
        }
        match (&self.ca_cert_path, &self.node_cert_path, &self.node_key_path) {
            (Some(ca), Some(cert), Some(key)) => {
                let credential = load_certificate_credential(
                    &resolve(base_dir, ca),
                    &resolve(base_dir, cert),
                    &resolve(base_dir, key),
                )?;
                let certificate = credential.certificate();
                if !certificate.covers(identity) {
                    return Err(credential_error(format!(
                        "certificate is for {} ({}), not {}",
                        certificate.subject, certificate.name, identity
                    )));
                }
                certificate
                    .verify(credential.trust_root(), SystemTimeSource::new().now())
                    .map_err(|e| credential_error(e.to_string()))?;
                Ok(Credential::Certificate(Arc::new(credential)))
            }
            _ => Err(credential_error("incomplete certificate configuration")),
        }
    }
}

/// Read the trust root, node certificate and node key from disk.
pub fn load_certificate_credential(
    ca_path: &Path,
    cert_path: &Path,
    key_path: &Path,
) -> ConfigResult<CertificateCredential> {
    let root = Ed25519PublicKey::from_bytes(read_hex32(ca_path)?)
        .map_err(|e| credential_error(format!("{}: {e}", ca_path.display())))?;

    let text = read(cert_path)?;
    let certificate: NodeCertificate = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: cert_path.to_path_buf(),
        source,
    })?;

    let key = Ed25519KeyPair::from_seed(read_hex32(key_path)?);
    CertificateCredential::new(certificate, key, root).map_err(|e| credential_error(e.to_string()))
}

fn resolve(base_dir: Option<&Path>, path: &Path) -> PathBuf {
    match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_hex32(path: &Path) -> ConfigResult<[u8; 32]> {
    let text = read(path)?;
    let bytes = hex::decode(text.trim())
        .map_err(|e| credential_error(format!("{}: {e}", path.display())))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        credential_error(format!(
            "{}: expected 32 bytes, found {}",
            path.display(),
            bytes.len()
        ))
    })
}

fn credential_error(reason: impl Into<String>) -> ConfigError {
    ConfigError::Credential {
        reason: reason.into(),
    }
}
