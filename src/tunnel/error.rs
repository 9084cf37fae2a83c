// ABOUTME: Setup error types with SNAFU pattern.
// ABOUTME: Unifies the failures of each tunnel setup stage for programmatic handling.

use snafu::Snafu;

use crate::relay::RelayError;
use crate::signing::SigningError;
use crate::ssh::{self, IdentityError};

/// A failure before the relay started; always fatal to the run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SetupError {
    #[snafu(display("failed to sign public key: {source}"))]
    Issuance { source: SigningError },

    #[snafu(display("failed to create certificate signer: {source}"))]
    Identity { source: IdentityError },

    #[snafu(display("{source}"))]
    Session { source: ssh::Error },

    #[snafu(display("{source}"))]
    Listen { source: RelayError },
}

/// Which setup stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Issuance,
    Identity,
    Session,
    Listen,
}

impl SetupError {
    pub fn stage(&self) -> SetupStage {
        match self {
            SetupError::Issuance { .. } => SetupStage::Issuance,
            SetupError::Identity { .. } => SetupStage::Identity,
            SetupError::Session { .. } => SetupStage::Session,
            SetupError::Listen { .. } => SetupStage::Listen,
        }
    }
}

impl From<SigningError> for SetupError {
    fn from(source: SigningError) -> Self {
        SetupError::Issuance { source }
    }
}

impl From<IdentityError> for SetupError {
    fn from(source: IdentityError) -> Self {
        SetupError::Identity { source }
    }
}

impl From<ssh::Error> for SetupError {
    fn from(source: ssh::Error) -> Self {
        SetupError::Session { source }
    }
}

impl From<RelayError> for SetupError {
    fn from(source: RelayError) -> Self {
        SetupError::Listen { source }
    }
}
