// ABOUTME: Connection relay: accepts local connections and forwards each through a channel.
// ABOUTME: Bounded concurrency, cancellation scoped to the whole relay, per-pair failure isolation.

mod error;
mod listener;
mod pair;
mod state;
mod stats;

pub use error::RelayError;
pub use listener::LocalListener;
pub use pair::{PumpEnd, RelayOutcome, RelayPair};
pub use state::{Accepted, Active};
pub use stats::{RelayStats, StatsSnapshot};

use crate::ssh::{self, TunnelSession};
use crate::types::Address;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default cap on concurrently relayed connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Pause after a failed accept so a persistent error (EMFILE) cannot spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> RelayStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn RelayStream>;

/// Source of local connections.
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next connection and describe its peer.
    async fn accept(&mut self) -> io::Result<(BoxedStream, String)>;
}

/// Opens byte streams to remote addresses.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
    async fn open_channel(&self, target: &Address) -> ssh::Result<BoxedStream>;
}

#[async_trait]
impl ChannelOpener for TunnelSession {
    async fn open_channel(&self, target: &Address) -> ssh::Result<BoxedStream> {
        let stream = TunnelSession::open_channel(self, target).await?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound on pairs alive at once. Zero is treated as one.
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Accept loop binding every local connection to a fresh remote channel.
pub struct Relay<A, O: ?Sized> {
    acceptor: A,
    opener: Arc<O>,
    remote: Address,
    limit: Arc<Semaphore>,
    stats: Arc<RelayStats>,
}

impl<A, O> Relay<A, O>
where
    A: Acceptor,
    O: ChannelOpener + ?Sized,
{
    pub fn new(acceptor: A, opener: Arc<O>, remote: Address, config: RelayConfig) -> Self {
        Self {
            acceptor,
            opener,
            remote,
            limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn remote(&self) -> &Address {
        &self.remote
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `cancel` fires, then wait for in-flight pairs.
    ///
    /// Accept and dial failures are logged and the loop keeps going, pausing
    /// briefly after a failed accept.
    pub async fn run(mut self, cancel: CancellationToken) -> StatsSnapshot {
        let tracker = TaskTracker::new();
        let mut next_id: u64 = 0;

        loop {
            // Wait for a free slot before taking the next connection.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.acceptor.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.stats.record_accept_failure();
                    tracing::warn!("{}", RelayError::Accept(e));
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                    }
                }
            };

            next_id += 1;
            self.stats.record_accept();
            tracing::debug!("Accepted connection {} from {}", next_id, peer);

            let pair = RelayPair::new(next_id, peer, stream);
            let opener = Arc::clone(&self.opener);
            let remote = self.remote.clone();
            let stats = Arc::clone(&self.stats);
            let cancel = cancel.clone();

            tracker.spawn(async move {
                let _permit = permit;

                let dialed = tokio::select! {
                    _ = cancel.cancelled() => return,
                    dialed = pair.dial(opener.as_ref(), &remote) => dialed,
                };
                let active = match dialed {
                    Ok(active) => active,
                    Err(_) => {
                        stats.record_dial_failure();
                        return;
                    }
                };

                stats.record_opened();
                let outcome = active.run(&cancel).await;
                stats.record_closed(
                    outcome.bytes_upstream(),
                    outcome.bytes_downstream(),
                    outcome.failed(),
                );
            });
        }

        tracker.close();
        tracker.wait().await;
        tracing::debug!("Relay to {} stopped", self.remote);

        self.stats.snapshot()
    }
}
