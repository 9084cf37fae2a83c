// ABOUTME: Tunnel assembly: sign key, build identity, connect, bind, relay.
// ABOUTME: The certificate issuer is injected so any KeySigner can drive the pipeline.

mod error;

pub use error::{SetupError, SetupStage};

use crate::relay::{LocalListener, Relay, RelayConfig, StatsSnapshot};
use crate::signing::KeySigner;
use crate::ssh::{SessionConfig, SigningIdentity, TunnelSession};
use crate::types::{Address, Principal};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a running tunnel checks whether the SSH connection has dropped.
const SESSION_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to bring a tunnel up.
#[derive(Debug, Clone)]
pub struct TunnelPlan {
    pub session: SessionConfig,
    pub principal: Principal,
    /// Public key text to have signed.
    pub public_key: Vec<u8>,
    /// Private key matching `public_key`.
    pub private_key: Vec<u8>,
    pub local: Address,
    pub remote: Address,
    pub relay: RelayConfig,
}

/// An authenticated session with a bound local listener, ready to relay.
pub struct Tunnel {
    identity: SigningIdentity,
    session: Arc<TunnelSession>,
    relay: Relay<LocalListener, TunnelSession>,
    local: Address,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("local", &self.local)
            .field("remote", self.relay.remote())
            .finish()
    }
}

impl Tunnel {
    /// Run every setup stage in order. The first failure aborts the setup.
    pub async fn establish<S>(plan: TunnelPlan, signer: &S) -> Result<Self, SetupError>
    where
        S: KeySigner + ?Sized,
    {
        let certificate = signer
            .sign_key(&plan.public_key, plan.principal.as_str())
            .await?;

        let identity = SigningIdentity::from_bytes(&plan.private_key, certificate.as_bytes())?;
        match identity.valid_before() {
            Some(expiry) => tracing::info!(
                "Certificate {} for {:?} valid until {}",
                identity.key_id(),
                identity.principals(),
                expiry
            ),
            None => tracing::info!(
                "Certificate {} for {:?} never expires",
                identity.key_id(),
                identity.principals()
            ),
        }

        let session = TunnelSession::connect(plan.session, &identity).await?;
        let session = Arc::new(session);

        let listener = LocalListener::bind(&plan.local).await?;
        let local = listener.local_addr().unwrap_or(plan.local);

        let relay = Relay::new(listener, Arc::clone(&session), plan.remote, plan.relay);

        Ok(Self {
            identity,
            session,
            relay,
            local,
        })
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// The bound local address.
    pub fn local_addr(&self) -> &Address {
        &self.local
    }

    pub fn remote_addr(&self) -> &Address {
        self.relay.remote()
    }

    /// Relay until `cancel` fires or the SSH connection drops, then disconnect.
    pub async fn run(self, cancel: CancellationToken) -> StatsSnapshot {
        let relay_cancel = cancel.child_token();

        let watcher = tokio::spawn(watch_session(
            Arc::clone(&self.session),
            relay_cancel.clone(),
        ));

        let stats = self.relay.run(relay_cancel).await;
        watcher.abort();

        if !self.session.is_closed() {
            if let Err(e) = self.session.close().await {
                tracing::debug!("Failed to disconnect cleanly: {}", e);
            }
        }

        stats
    }
}

async fn watch_session(session: Arc<TunnelSession>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SESSION_WATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if session.is_closed() {
                    tracing::error!("SSH connection to {} closed", session.config().host);
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}
