// ABOUTME: Local listening socket for the near end of the tunnel.
// ABOUTME: TCP or Unix socket; the Unix socket file is cleaned up on drop.

use super::error::RelayError;
use super::{Acceptor, BoxedStream};
use crate::types::Address;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, UnixListener};

#[derive(Debug)]
pub enum LocalListener {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl LocalListener {
    pub async fn bind(address: &Address) -> Result<Self, RelayError> {
        let bind_error = |source| RelayError::Bind {
            address: address.to_string(),
            source,
        };

        match address {
            Address::Stream(addr) => TcpListener::bind(addr.as_str())
                .await
                .map(Self::Tcp)
                .map_err(bind_error),
            Address::Local(path) => {
                remove_stale_socket(path);
                let listener = UnixListener::bind(path).map_err(bind_error)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Address::Datagram(_) | Address::RawIp(_) => {
                Err(RelayError::UnsupportedListener(address.kind()))
            }
        }
    }

    /// The address actually bound, with any port 0 resolved.
    pub fn local_addr(&self) -> io::Result<Address> {
        match self {
            Self::Tcp(listener) => Ok(Address::Stream(listener.local_addr()?.to_string())),
            Self::Unix { path, .. } => Ok(Address::Local(path.clone())),
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[async_trait]
impl Acceptor for LocalListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true).ok();
                Ok((Box::new(stream), peer.to_string()))
            }
            Self::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), format!("unix:{}", path.display())))
            }
        }
    }
}

/// Remove a socket file left behind by an earlier run. Other files are left alone.
fn remove_stale_socket(path: &Path) {
    use std::os::unix::fs::FileTypeExt;

    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            let _ = std::fs::remove_file(path);
        }
    }
}
