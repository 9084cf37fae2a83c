// ABOUTME: SSH tunnel session management using russh.
// ABOUTME: Handles connection, certificate authentication and channel opening.

use super::error::{Error, Result};
use super::identity::SigningIdentity;
use crate::types::Address;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use russh::{ChannelStream, Disconnect};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How the client treats the server's host key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any host key without verification.
    #[default]
    AcceptAny,
    /// Only accept keys already present in known_hosts.
    KnownHosts,
    /// Learn unknown keys, reject keys that changed.
    TrustOnFirstUse,
}

/// Configuration for establishing a tunnel session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    pub host_key_policy: HostKeyPolicy,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Upper bound on TCP connect plus SSH handshake.
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: crate::types::DEFAULT_SSH_PORT,
            user: user.into(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn new(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            policy: config.host_key_policy,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }

    fn learn(&self, server_public_key: &ssh_key::PublicKey) {
        let learn_result = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => learn_known_hosts(&self.host, self.port, server_public_key),
        };
        if let Err(e) = learn_result {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAny {
            tracing::warn!(
                "Accepting host key for {}:{} without verification",
                self.host,
                self.port
            );
            return Ok(true);
        }

        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.policy == HostKeyPolicy::TrustOnFirstUse => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                self.learn(server_public_key);
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!("Host key for {}:{} is not in known_hosts", self.host, self.port);
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(
                    "Host key for {}:{} does not match known_hosts",
                    self.host,
                    self.port
                );
                Ok(false)
            }
            Err(e) => {
                tracing::debug!("known_hosts lookup failed: {}", e);
                Ok(self.policy == HostKeyPolicy::TrustOnFirstUse)
            }
        }
    }
}

/// An authenticated SSH connection that can open channels to remote addresses.
///
/// Channel opening takes `&self`; the russh handle serializes requests onto
/// the connection, so one session can be shared by many relay workers.
pub struct TunnelSession {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl TunnelSession {
    /// Connect to the remote host and authenticate with the certificate.
    pub async fn connect(config: SessionConfig, identity: &SigningIdentity) -> Result<Self> {
        let address = config.address();

        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval: config.keepalive_interval,
            ..Default::default()
        };

        let connecting = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            SshHandler::new(&config),
        );

        let mut handle = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(Error::Dial {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::Dial {
                    address,
                    reason: format!("timed out after {:?}", config.connect_timeout),
                });
            }
        };

        let auth = handle
            .authenticate_openssh_cert(
                &config.user,
                identity.private_key(),
                identity.certificate().clone(),
            )
            .await
            .map_err(|e| Error::Dial {
                address: address.clone(),
                reason: format!("authentication failed: {e}"),
            })?;

        if !auth.success() {
            return Err(Error::AuthenticationRejected(config.user));
        }

        tracing::debug!("Authenticated to {} as {}", address, config.user);

        Ok(Self { config, handle })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a byte stream to `target` on the far side of the connection.
    pub async fn open_channel(&self, target: &Address) -> Result<ChannelStream<Msg>> {
        let channel = match target {
            Address::Stream(_) => {
                let (host, port) = target.host_port().ok_or_else(|| Error::ChannelOpen {
                    target: target.to_string(),
                    reason: "expected host:port".to_string(),
                })?;
                self.handle
                    .channel_open_direct_tcpip(host, u32::from(port), "0.0.0.0", 0)
                    .await
            }
            Address::Local(path) => {
                self.handle
                    .channel_open_direct_streamlocal(path.to_string_lossy())
                    .await
            }
            Address::Datagram(_) | Address::RawIp(_) => {
                return Err(Error::UnsupportedNetwork(target.kind()));
            }
        };

        let channel = channel.map_err(|e| Error::ChannelOpen {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        Ok(channel.into_stream())
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Disconnect the session.
    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}
