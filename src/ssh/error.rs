// ABOUTME: SSH-specific error types.
// ABOUTME: Covers identity construction, dialing, authentication and channel failures.

use crate::types::NetworkKind;
use thiserror::Error;

/// Failures building a [`SigningIdentity`](super::SigningIdentity).
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no {0} provided")]
    InputMissing(&'static str),

    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("error parsing private key: {0}")]
    KeyParse(String),

    #[error("error parsing signed public key: {0}")]
    CertificateParse(String),

    #[error(
        "certificate key {certificate} does not match private key {private_key}"
    )]
    KeyMismatch {
        certificate: String,
        private_key: String,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to server {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("server rejected certificate authentication for user {0}")]
    AuthenticationRejected(String),

    #[error("failed to open channel to {target}: {reason}")]
    ChannelOpen { target: String, reason: String },

    #[error("{0} destinations cannot be reached through an SSH tunnel")]
    UnsupportedNetwork(NetworkKind),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
