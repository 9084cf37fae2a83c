// ABOUTME: SSH client module for certificate-authenticated tunnels.
// ABOUTME: Builds signing identities and opens channels through an SSH session.

mod client;
mod error;
mod identity;

pub use client::{HostKeyPolicy, SessionConfig, TunnelSession};
pub use error::{Error, IdentityError, Result};
pub use identity::SigningIdentity;
