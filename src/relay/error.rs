// ABOUTME: Relay error types.
// ABOUTME: Listener setup failures plus per-connection accept, dial and transfer failures.

use crate::ssh;
use crate::types::NetworkKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to open listener socket {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("cannot listen on {0} addresses")]
    UnsupportedListener(NetworkKind),

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    #[error("failed to connect to remote end of tunnel {target}: {source}")]
    Dial { target: String, source: ssh::Error },

    #[error("failed to transfer data in tunnel: {0}")]
    Transfer(std::io::Error),
}
