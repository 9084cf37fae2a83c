// ABOUTME: Certificate-backed signing identity for SSH authentication.
// ABOUTME: Binds a private key to an OpenSSH certificate issued for its public key.

use super::error::IdentityError;
use chrono::{DateTime, Utc};
use russh::keys::decode_secret_key;
use russh::keys::ssh_key::{Certificate, HashAlg, PrivateKey, PublicKey};
use std::io::Read;
use std::sync::Arc;

/// A private key paired with the certificate that vouches for it.
///
/// Construction checks that the certificate was issued for exactly this key,
/// so a `SigningIdentity` can always be handed to the SSH client as-is.
#[derive(Clone)]
pub struct SigningIdentity {
    key: Arc<PrivateKey>,
    certificate: Certificate,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key", &"<private key>")
            .field("key_id", &self.key_id())
            .field("principals", &self.principals())
            .finish()
    }
}

impl SigningIdentity {
    /// Build an identity from in-memory key and certificate text.
    pub fn from_bytes(private_key: &[u8], certificate: &[u8]) -> Result<Self, IdentityError> {
        if private_key.iter().all(u8::is_ascii_whitespace) {
            return Err(IdentityError::InputMissing("private key"));
        }
        if certificate.iter().all(u8::is_ascii_whitespace) {
            return Err(IdentityError::InputMissing("signed public key"));
        }

        let key = parse_private_key(private_key)?;
        let certificate = parse_certificate(certificate)?;

        if certificate.public_key() != key.public_key().key_data() {
            let cert_key = PublicKey::from(certificate.public_key().clone());
            return Err(IdentityError::KeyMismatch {
                certificate: cert_key.fingerprint(HashAlg::Sha256).to_string(),
                private_key: key.public_key().fingerprint(HashAlg::Sha256).to_string(),
            });
        }

        Ok(Self {
            key: Arc::new(key),
            certificate,
        })
    }

    /// Build an identity by draining two readers.
    pub fn from_readers(
        mut private_key: impl Read,
        mut certificate: impl Read,
    ) -> Result<Self, IdentityError> {
        let mut key_bytes = Vec::new();
        private_key
            .read_to_end(&mut key_bytes)
            .map_err(|source| IdentityError::Read {
                what: "private key",
                source,
            })?;

        let mut cert_bytes = Vec::new();
        certificate
            .read_to_end(&mut cert_bytes)
            .map_err(|source| IdentityError::Read {
                what: "signed public key",
                source,
            })?;

        Self::from_bytes(&key_bytes, &cert_bytes)
    }

    pub fn private_key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key_id(&self) -> &str {
        self.certificate.key_id()
    }

    pub fn principals(&self) -> &[String] {
        self.certificate.valid_principals()
    }

    /// SHA-256 fingerprint of the certified public key.
    pub fn fingerprint(&self) -> String {
        self.key.public_key().fingerprint(HashAlg::Sha256).to_string()
    }

    pub fn valid_after(&self) -> Option<DateTime<Utc>> {
        timestamp(self.certificate.valid_after())
    }

    /// `None` when the certificate never expires.
    pub fn valid_before(&self) -> Option<DateTime<Utc>> {
        timestamp(self.certificate.valid_before())
    }
}

fn parse_private_key(bytes: &[u8]) -> Result<PrivateKey, IdentityError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| IdentityError::KeyParse("private key is not valid UTF-8".to_string()))?;
    decode_secret_key(text, None).map_err(|e| IdentityError::KeyParse(e.to_string()))
}

fn parse_certificate(bytes: &[u8]) -> Result<Certificate, IdentityError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| {
            IdentityError::CertificateParse("certificate is not valid UTF-8".to_string())
        })?
        .trim();

    Certificate::from_openssh(text).map_err(|e| {
        if PublicKey::from_openssh(text).is_ok() {
            IdentityError::CertificateParse(
                "expected a signed certificate but found a plain public key".to_string(),
            )
        } else {
            IdentityError::CertificateParse(e.to_string())
        }
    })
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
