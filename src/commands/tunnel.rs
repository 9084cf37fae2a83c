// ABOUTME: Tunnel command implementation.
// ABOUTME: Merges flags with the config file, brings the tunnel up, and relays until a signal.

use crate::cli::Cli;
use catapult::config::{self, Config};
use catapult::error::{Error, Result};
use catapult::output::Output;
use catapult::relay::RelayConfig;
use catapult::signing::{VaultConfig, VaultSigner};
use catapult::ssh::{HostKeyPolicy, SessionConfig};
use catapult::tunnel::{SetupError, Tunnel, TunnelPlan};
use catapult::types::{Address, Principal, ServerTarget};
use std::env;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Everything the command needs, after flags and config are merged.
#[derive(Debug)]
struct Settings {
    target: ServerTarget,
    user: String,
    principal: Principal,
    private_key: PathBuf,
    public_key: PathBuf,
    local: Address,
    remote: Address,
    vault: VaultConfig,
    session: SessionConfig,
    relay: RelayConfig,
}

impl Settings {
    /// Flags win over the config file; the config file wins over defaults.
    fn resolve(cli: &Cli, config: Config, home: Option<&Path>) -> Result<Self> {
        let target = ServerTarget::parse(&cli.server).map_err(|e| {
            Error::InvalidArgument(format!(
                "failed to parse command argument {}: {}",
                cli.server, e
            ))
        })?;
        let user = target
            .user_or_current()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let principal = match &cli.principal {
            Some(p) => Principal::new(p)
                .map_err(|e| Error::InvalidArgument(format!("invalid principal {p}: {e}")))?,
            None => match config.principal.clone() {
                Some(p) => p,
                None => Principal::new(&user).map_err(|e| {
                    Error::InvalidArgument(format!("username {user} is not a valid principal: {e}"))
                })?,
            },
        };

        let private_key = cli
            .private_key
            .clone()
            .or_else(|| config.private_key.clone())
            .ok_or_else(|| missing("--private-key", "private_key"))?;
        let public_key = cli
            .public_key
            .clone()
            .or_else(|| config.public_key.clone())
            .ok_or_else(|| missing("--public-key", "public_key"))?;

        let local = address_arg(cli.local_address.as_deref(), config.local.clone(), "local")?
            .ok_or_else(|| missing("--local-address", "local"))?;
        let remote = address_arg(cli.remote_address.as_deref(), config.remote.clone(), "remote")?
            .ok_or_else(|| missing("--remote-address", "remote"))?;
        let local = tunnelable(local, "local")?;
        let remote = tunnelable(remote, "remote")?;

        let vault = vault_config(cli, &config, home)?;

        let policy = cli
            .host_key_policy
            .map(HostKeyPolicy::from)
            .or(config.host_key.policy)
            .unwrap_or_default();
        let mut session = SessionConfig::new(target.host.clone(), user.clone())
            .port(target.port)
            .host_key_policy(policy);
        if let Some(path) = cli.known_hosts.clone().or(config.host_key.known_hosts.clone()) {
            session = session.known_hosts_path(path);
        }
        if let Some(timeout) = cli.connect_timeout.or(config.connect_timeout) {
            session = session.connect_timeout(timeout);
        }

        let mut relay = RelayConfig::default();
        if let Some(max) = cli.max_connections.or(config.relay.max_connections) {
            relay.max_connections = max;
        }

        Ok(Self {
            target,
            user,
            principal,
            private_key,
            public_key,
            local,
            remote,
            vault,
            session,
            relay,
        })
    }
}

fn missing(flag: &str, key: &str) -> Error {
    Error::InvalidArgument(format!(
        "missing required option {flag} (or `{key}` in the config file)"
    ))
}

fn address_arg(flag: Option<&str>, from_config: Option<Address>, which: &str) -> Result<Option<Address>> {
    match flag {
        Some(s) => Address::parse(s).map(Some).map_err(|e| {
            Error::InvalidArgument(format!("failed to parse {which} address {s}: {e}"))
        }),
        None => Ok(from_config),
    }
}

/// Only stream sockets can ride an SSH channel; catch the rest before signing.
fn tunnelable(address: Address, which: &str) -> Result<Address> {
    match address {
        Address::Datagram(_) | Address::RawIp(_) => Err(Error::InvalidArgument(format!(
            "{which} address {address} cannot be tunneled: only tcp and unix addresses are supported"
        ))),
        address => Ok(address),
    }
}

fn vault_config(cli: &Cli, config: &Config, home: Option<&Path>) -> Result<VaultConfig> {
    let mut vault = VaultConfig::default();
    if let Some(address) = cli.vault_addr.clone().or(config.vault.address.clone()) {
        vault.address = address;
    }
    if let Some(mount) = cli.vault_mount.clone().or(config.vault.mount.clone()) {
        vault.mount = mount;
    }
    if let Some(role) = cli.vault_role.clone().or(config.vault.role.clone()) {
        vault.role = role;
    }
    if let Some(timeout) = config.vault.timeout {
        vault.timeout = timeout;
    }

    vault.token = match &cli.vault_token {
        Some(token) if !token.is_empty() => Some(token.clone()),
        _ => match config.vault_token()? {
            Some(token) => Some(token),
            None => home.and_then(config::read_token_file),
        },
    };

    Ok(vault)
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path);
    }
    let cwd = env::current_dir()?;
    match Config::find(&cwd) {
        Some(path) => {
            tracing::debug!("Using config file {}", path.display());
            Config::load(&path)
        }
        None => Ok(Config::default()),
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Sign the key, connect, and relay until SIGINT/SIGTERM or the connection drops.
pub async fn tunnel(cli: Cli, mut output: Output) -> Result<()> {
    if !cli.extra.is_empty() {
        output.warn("extra arguments will be ignored");
    }

    let config = load_config(cli.config.as_deref())?;
    let home = env::var_os("HOME").map(PathBuf::from);
    let settings = Settings::resolve(&cli, config, home.as_deref())?;
    tracing::debug!("Resolved settings: {:?}", settings);

    output.start_timer();

    let public_key = read_key_file(&settings.public_key)?;
    let private_key = read_key_file(&settings.private_key)?;

    output.progress(&format!(
        "Requesting certificate for {} from {}",
        settings.principal, settings.vault.address
    ));
    let signer = VaultSigner::new(settings.vault).map_err(SetupError::from)?;

    let plan = TunnelPlan {
        session: settings.session,
        principal: settings.principal,
        public_key,
        private_key,
        local: settings.local,
        remote: settings.remote,
        relay: settings.relay,
    };

    output.progress(&format!(
        "Connecting to {} as {}",
        settings.target, settings.user
    ));
    let tunnel = Tunnel::establish(plan, &signer).await?;

    if let Some(expiry) = tunnel.identity().valid_before() {
        output.progress(&format!("Certificate valid until {expiry}"));
    }
    output.success(&format!(
        "Forwarding {} to {} through {}",
        tunnel.local_addr(),
        tunnel.remote_addr(),
        settings.target
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let stats = tunnel.run(cancel.clone()).await;
    tracing::info!(
        "Relayed {} connection(s): {} bytes up, {} bytes down",
        stats.completed,
        stats.bytes_upstream,
        stats.bytes_downstream
    );

    if cancel.is_cancelled() {
        output.progress("Tunnel closed");
        Ok(())
    } else {
        Err(Error::ConnectionLost(settings.target.to_string()))
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    match wait_for_signal().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        }
        Err(e) => tracing::warn!("Failed to install signal handler: {}", e),
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
