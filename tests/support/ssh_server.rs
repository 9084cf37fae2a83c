// ABOUTME: In-process SSH server that trusts a test CA and echoes forwarded channels.
// ABOUTME: Also mints short-lived user certificates signed by that CA.

use russh::keys::ssh_key::certificate::{Builder, CertType};
use russh::keys::ssh_key::private::Ed25519Keypair;
use russh::keys::ssh_key::{Certificate, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, Disconnect};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const CA_SEED: [u8; 32] = [0x0c; 32];
const HOST_SEED: [u8; 32] = [0x4e; 32];

/// The CA whose certificates the test server accepts.
pub fn ca_key() -> PrivateKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&CA_SEED))
}

/// A host key unrelated to the server's, for known_hosts mismatches.
pub fn other_host_key() -> PublicKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&[0x77; 32]))
        .public_key()
        .clone()
}

/// Sign `public_key` (OpenSSH text) as a user certificate valid for the next hour.
pub fn issue_certificate(public_key: &[u8], principal: &str) -> String {
    let text = std::str::from_utf8(public_key).unwrap();
    let subject = PublicKey::from_openssh(text.trim()).unwrap();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let mut builder = Builder::new(
        vec![0x5a; Builder::RECOMMENDED_NONCE_SIZE],
        subject.key_data().clone(),
        now - 60,
        now + 3600,
    )
    .unwrap();
    builder.serial(1).unwrap();
    builder.key_id("catapult-test").unwrap();
    builder.cert_type(CertType::User).unwrap();
    builder.valid_principal(principal).unwrap();
    builder.extension("permit-port-forwarding", "").unwrap();
    builder.sign(&ca_key()).unwrap().to_openssh().unwrap()
}

#[derive(Default)]
struct ServerState {
    refusals: AtomicUsize,
    authenticated: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    sessions: Mutex<Vec<server::Handle>>,
}

pub struct TestSshServer {
    port: u16,
    host_key: PublicKey,
    state: Arc<ServerState>,
}

impl TestSshServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let host_key = PrivateKey::from(Ed25519Keypair::from_seed(&HOST_SEED));
        let state = Arc::new(ServerState::default());

        let config = Arc::new(server::Config {
            keys: vec![host_key.clone()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: None,
            ..Default::default()
        });

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let handler = SessionHandler {
                        state: Arc::clone(&state),
                        ca: ca_key().public_key().clone(),
                    };
                    if let Ok(running) = server::run_stream(config, stream, handler).await {
                        state.sessions.lock().unwrap().push(running.handle());
                        let _ = running.await;
                    }
                });
            }
        });

        Self {
            port,
            host_key: host_key.public_key().clone(),
            state,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host_key(&self) -> &PublicKey {
        &self.host_key
    }

    /// Refuse the next `n` forwarding requests.
    pub fn refuse_next(&self, n: usize) {
        self.state.refusals.fetch_add(n, Ordering::SeqCst);
    }

    /// Users that authenticated with a trusted certificate.
    pub fn authenticated(&self) -> Vec<String> {
        self.state.authenticated.lock().unwrap().clone()
    }

    /// Destinations of accepted forwarding channels, as `host:port` or socket path.
    pub fn opened(&self) -> Vec<String> {
        self.state.opened.lock().unwrap().clone()
    }

    /// Drop every client connection from the server side.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<_> = self.state.sessions.lock().unwrap().drain(..).collect();
        for session in sessions {
            let _ = session
                .disconnect(Disconnect::ByApplication, "test shutdown".into(), "en".into())
                .await;
        }
    }
}

struct SessionHandler {
    state: Arc<ServerState>,
    ca: PublicKey,
}

impl SessionHandler {
    /// Accept the channel and echo it unless a refusal is pending.
    fn forward(&self, channel: Channel<Msg>, destination: String) -> bool {
        let refused = self
            .state
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return false;
        }

        self.state.opened.lock().unwrap().push(destination);
        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(channel.into_stream());
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
            let _ = wr.shutdown().await;
        });
        true
    }
}

impl server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_openssh_certificate(
        &mut self,
        user: &str,
        certificate: &Certificate,
    ) -> Result<Auth, Self::Error> {
        let trusted = certificate.signature_key() == self.ca.key_data();
        let permitted = certificate.valid_principals().iter().any(|p| p == user);
        if trusted && permitted {
            self.state.authenticated.lock().unwrap().push(user.to_string());
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.forward(channel, format!("{host_to_connect}:{port_to_connect}")))
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.forward(channel, socket_path.to_string()))
    }
}
