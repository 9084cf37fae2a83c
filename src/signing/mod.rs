// ABOUTME: Certificate issuance: turns a public key and principal into a signed certificate.
// ABOUTME: Defines the KeySigner capability trait and its Vault-backed implementation.

mod vault;

pub use vault::{VaultConfig, VaultSigner};

use async_trait::async_trait;
use std::fmt;

/// Signs SSH public keys into short-lived user certificates.
#[async_trait]
pub trait KeySigner: Send + Sync {
    /// Request a certificate for `public_key` valid for `principal`.
    async fn sign_key(
        &self,
        public_key: &[u8],
        principal: &str,
    ) -> Result<SignedCertificate, SigningError>;
}

/// Certificate text in authorized-key format, as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate(String);

impl SignedCertificate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SignedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.trim_end())
    }
}

/// Errors from certificate issuance.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("no {0} provided to sign_key")]
    InputMissing(&'static str),

    #[error("invalid input to sign_key: {0}")]
    InvalidInput(String),

    #[error("signing request denied ({status}): {message}")]
    IssuanceDenied { status: u16, message: String },

    #[error("signing backend error: {0}")]
    Transport(String),
}
