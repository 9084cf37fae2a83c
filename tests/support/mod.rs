// ABOUTME: Test support utilities.
// ABOUTME: Provides key fixtures, mock Vault and SSH servers, and in-memory relay endpoints.

use async_trait::async_trait;
use catapult::relay::{Acceptor, BoxedStream, ChannelOpener};
use catapult::ssh;
use catapult::types::Address;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

// Each test binary only uses some of these helpers, so allow dead_code.
#[allow(dead_code)]
pub mod ssh_server;
#[allow(dead_code)]
pub mod vault;

static TRACING_INIT: Once = Once::new();

const PIPE_CAPACITY: usize = 64 * 1024;

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("catapult=debug".parse().unwrap())
            .add_directive("russh=info".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).unwrap()
}

/// Acceptor fed by the test through [`LocalClients`].
///
/// Once every `LocalClients` handle is dropped, `accept` waits forever, like
/// an idle listener.
#[allow(dead_code)]
pub struct ScriptedAcceptor {
    rx: mpsc::UnboundedReceiver<io::Result<(BoxedStream, String)>>,
}

#[async_trait]
impl Acceptor for ScriptedAcceptor {
    async fn accept(&mut self) -> io::Result<(BoxedStream, String)> {
        match self.rx.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }
}

/// Handle for simulating local clients.
#[allow(dead_code)]
#[derive(Clone)]
pub struct LocalClients {
    tx: mpsc::UnboundedSender<io::Result<(BoxedStream, String)>>,
    count: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl LocalClients {
    /// Connect a new client; returns the client's end of the connection.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(Ok((Box::new(server), format!("client-{n}"))))
            .unwrap();
        client
    }

    /// Make the next accept fail.
    pub fn fail_accept(&self) {
        self.tx
            .send(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "forced accept failure",
            )))
            .unwrap();
    }
}

#[allow(dead_code)]
pub fn scripted_acceptor() -> (ScriptedAcceptor, LocalClients) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ScriptedAcceptor { rx },
        LocalClients {
            tx,
            count: Arc::new(AtomicUsize::new(0)),
        },
    )
}

/// A channel opened through [`MemoryOpener`], seen from the remote side.
#[allow(dead_code)]
pub struct RemoteEnd {
    pub target: Address,
    pub stream: DuplexStream,
}

/// Channel opener that hands the far end of each channel to the test.
#[allow(dead_code)]
pub struct MemoryOpener {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    refusals: AtomicUsize,
    opened: AtomicUsize,
    attempts: Mutex<Vec<Address>>,
}

#[allow(dead_code)]
impl MemoryOpener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Arc::new(Self {
            remotes: tx,
            refusals: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
        });
        (opener, rx)
    }

    /// Refuse the next `n` dial attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refusals.fetch_add(n, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> Vec<Address> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelOpener for MemoryOpener {
    async fn open_channel(&self, target: &Address) -> ssh::Result<BoxedStream> {
        self.attempts.lock().unwrap().push(target.clone());

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ssh::Error::ChannelOpen {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        self.opened.fetch_add(1, Ordering::SeqCst);
        // The test may have stopped listening for remotes; the near end then just sees EOF.
        let _ = self.remotes.send(RemoteEnd {
            target: target.clone(),
            stream: far,
        });
        Ok(Box::new(near))
    }
}

/// Serve every remote end as an echo server.
#[allow(dead_code)]
pub fn spawn_echo_remotes(mut remotes: mpsc::UnboundedReceiver<RemoteEnd>) {
    tokio::spawn(async move {
        while let Some(remote) = remotes.recv().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = tokio::io::split(remote.stream);
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut wr).await;
            });
        }
    });
}
