// ABOUTME: One local connection bound to one remote channel.
// ABOUTME: Dials the remote side, then pumps bytes both ways until both directions end.

use super::error::RelayError;
use super::state::{Accepted, Active};
use super::{BoxedStream, ChannelOpener};
use crate::types::Address;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// A relay pair in state `S`.
pub struct RelayPair<S> {
    id: u64,
    peer: String,
    local: BoxedStream,
    state: S,
}

impl<S: std::fmt::Debug> std::fmt::Debug for RelayPair<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPair")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}

impl RelayPair<Accepted> {
    pub fn new(id: u64, peer: impl Into<String>, local: BoxedStream) -> Self {
        Self {
            id,
            peer: peer.into(),
            local,
            state: Accepted,
        }
    }

    /// Open the companion channel to `target`.
    ///
    /// On failure the local connection is shut down and dropped; there is no
    /// retry.
    pub async fn dial<O>(self, opener: &O, target: &Address) -> Result<RelayPair<Active>, RelayError>
    where
        O: ChannelOpener + ?Sized,
    {
        let RelayPair {
            id,
            peer,
            mut local,
            ..
        } = self;

        tracing::debug!("Connection {} from {}: dialing {}", id, peer, target);

        match opener.open_channel(target).await {
            Ok(remote) => Ok(RelayPair {
                id,
                peer,
                local,
                state: Active { remote },
            }),
            Err(source) => {
                let _ = local.shutdown().await;
                let err = RelayError::Dial {
                    target: target.to_string(),
                    source,
                };
                tracing::warn!("Connection {} from {}: {}", id, peer, err);
                Err(err)
            }
        }
    }
}

impl RelayPair<Active> {
    /// Pump bytes in both directions until both have finished.
    ///
    /// Each direction runs on its own task. End-of-stream on one side
    /// half-closes the other; an I/O error or cancellation of `cancel` stops
    /// both.
    pub async fn run(self, cancel: &CancellationToken) -> RelayOutcome {
        let pair_cancel = cancel.child_token();

        let (local_rd, local_wr) = tokio::io::split(self.local);
        let (remote_rd, remote_wr) = tokio::io::split(self.state.remote);

        let upstream = tokio::spawn(pump(local_rd, remote_wr, pair_cancel.clone()));
        let downstream = tokio::spawn(pump(remote_rd, local_wr, pair_cancel));

        let (upstream, downstream) = tokio::join!(upstream, downstream);
        let outcome = RelayOutcome {
            upstream: joined(upstream),
            downstream: joined(downstream),
        };

        for end in [&outcome.upstream, &outcome.downstream] {
            if let PumpEnd::Failed(_, err) = end {
                tracing::warn!("Connection {} from {}: {}", self.id, self.peer, err);
            }
        }
        tracing::debug!(
            "Connection {} from {} closed ({} bytes up, {} bytes down)",
            self.id,
            self.peer,
            outcome.bytes_upstream(),
            outcome.bytes_downstream()
        );

        outcome
    }
}

/// How one direction of a pair ended. Each variant carries the bytes
/// delivered to the destination before the end.
#[derive(Debug)]
pub enum PumpEnd {
    /// Source reached end-of-stream.
    Finished(u64),
    /// The relay shut down or the opposite direction failed.
    Cancelled(u64),
    Failed(u64, RelayError),
}

impl PumpEnd {
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Finished(n) | Self::Cancelled(n) | Self::Failed(n, _) => *n,
        }
    }
}

/// Final state of both directions of a closed pair.
#[derive(Debug)]
pub struct RelayOutcome {
    /// Local connection to remote channel.
    pub upstream: PumpEnd,
    /// Remote channel to local connection.
    pub downstream: PumpEnd,
}

impl RelayOutcome {
    pub fn bytes_upstream(&self) -> u64 {
        self.upstream.bytes()
    }

    pub fn bytes_downstream(&self) -> u64 {
        self.downstream.bytes()
    }

    pub fn failed(&self) -> bool {
        matches!(self.upstream, PumpEnd::Failed(..)) || matches!(self.downstream, PumpEnd::Failed(..))
    }
}

fn joined(result: Result<PumpEnd, tokio::task::JoinError>) -> PumpEnd {
    result.unwrap_or_else(|e| PumpEnd::Failed(0, RelayError::Transfer(std::io::Error::other(e))))
}

const PUMP_BUFFER_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer` verbatim, then close the writer's send side.
///
/// Bytes are counted per chunk written, so a cancelled or failed pump still
/// reports what it delivered.
async fn pump<R, W>(mut reader: R, mut writer: W, cancel: CancellationToken) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied: u64 = 0;
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];

    let end = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break PumpEnd::Cancelled(copied),
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break PumpEnd::Finished(copied),
            Ok(n) => n,
            Err(e) => break PumpEnd::Failed(copied, RelayError::Transfer(e)),
        };

        // A finished write wins over cancellation so delivered bytes are counted.
        let written = tokio::select! {
            biased;
            written = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            } => written,
            _ = cancel.cancelled() => break PumpEnd::Cancelled(copied),
        };
        match written {
            Ok(()) => copied += n as u64,
            Err(e) => break PumpEnd::Failed(copied, RelayError::Transfer(e)),
        }
    };

    let _ = writer.shutdown().await;

    if matches!(end, PumpEnd::Failed(..)) {
        cancel.cancel();
    }

    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, ReadBuf};

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "forced error for testing",
            )))
        }
    }

    #[tokio::test]
    async fn pump_copies_bytes_and_half_closes_destination() {
        let (mut source, source_far) = tokio::io::duplex(64);
        let (dest_near, mut dest) = tokio::io::duplex(64);

        source.write_all(b"hello tunnel").await.unwrap();
        source.shutdown().await.unwrap();

        let end = pump(source_far, dest_near, CancellationToken::new()).await;
        assert!(matches!(end, PumpEnd::Finished(12)));

        let mut received = Vec::new();
        dest.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello tunnel");
    }

    #[tokio::test]
    async fn pump_failure_cancels_the_pair() {
        let (dest_near, _dest) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let end = pump(FailingReader, dest_near, cancel.clone()).await;

        assert!(matches!(end, PumpEnd::Failed(0, RelayError::Transfer(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn pump_stops_when_cancelled() {
        let (_source, source_far) = tokio::io::duplex(64);
        let (dest_near, mut dest) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let end = pump(source_far, dest_near, cancel).await;
        assert!(matches!(end, PumpEnd::Cancelled(0)));

        // Destination still sees a clean end-of-stream.
        let mut received = Vec::new();
        dest.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn cancelled_pump_reports_bytes_already_delivered() {
        let (mut source, source_far) = tokio::io::duplex(64);
        let (dest_near, mut dest) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(pump(source_far, dest_near, cancel.clone()));

        // Source stays open; only cancellation ends the pump.
        source.write_all(b"partial").await.unwrap();
        let mut received = [0u8; 7];
        dest.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"partial");

        cancel.cancel();
        let end = task.await.unwrap();
        assert!(matches!(end, PumpEnd::Cancelled(7)), "got {end:?}");
        assert_eq!(end.bytes(), 7);
    }
}
