// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: One command: sign the key, connect, and forward the local address.

use clap::{Parser, ValueEnum};
use catapult::ssh::HostKeyPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "catapult")]
#[command(about = "Sign an SSH key, then use the certificate to tunnel a local port to a server")]
#[command(long_about = "Catapult has a key signing service sign the given public SSH key. \
It then connects to the server with that certificate and forwards every connection \
accepted on the local address to the remote address, in both directions.")]
#[command(version)]
pub struct Cli {
    /// Server to connect to, as [username@]host[:port]
    #[arg(value_name = "[USERNAME@]SERVER")]
    pub server: String,

    /// Ignored; accepted for compatibility
    #[arg(hide = true)]
    pub extra: Vec<String>,

    /// File containing the private SSH key used to connect to the server
    #[arg(short = 'k', long, alias = "privateKey", value_name = "FILE")]
    pub private_key: Option<PathBuf>,

    /// File containing the public SSH key to sign
    #[arg(short = 'p', long, alias = "publicKey", value_name = "FILE")]
    pub public_key: Option<PathBuf>,

    /// Local end of the tunnel, as [network:]address
    #[arg(short = 'l', long, alias = "localAddress", value_name = "ADDRESS")]
    pub local_address: Option<String>,

    /// Remote end of the tunnel, as [network:]address
    #[arg(short = 'r', long, alias = "remoteAddress", value_name = "ADDRESS")]
    pub remote_address: Option<String>,

    /// Principal to request in the certificate (default: the username)
    #[arg(long)]
    pub principal: Option<String>,

    /// Config file (default: catapult.yml in the current directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address of the Vault server
    #[arg(long, env = "VAULT_ADDR", value_name = "URL")]
    pub vault_addr: Option<String>,

    /// Vault token
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub vault_token: Option<String>,

    /// Mount path of the Vault SSH secrets engine
    #[arg(long, value_name = "PATH")]
    pub vault_mount: Option<String>,

    /// Vault role used to sign the key
    #[arg(long, value_name = "ROLE")]
    pub vault_role: Option<String>,

    /// How to verify the server's host key
    #[arg(long, value_enum, value_name = "POLICY")]
    pub host_key_policy: Option<HostKeyArg>,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long, value_name = "FILE")]
    pub known_hosts: Option<PathBuf>,

    /// Maximum number of connections relayed at once
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// Timeout for connecting and authenticating to the server
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub connect_timeout: Option<Duration>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print only the ready line and errors
    #[arg(short, long, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostKeyArg {
    AcceptAny,
    KnownHosts,
    TrustOnFirstUse,
}

impl From<HostKeyArg> for HostKeyPolicy {
    fn from(arg: HostKeyArg) -> Self {
        match arg {
            HostKeyArg::AcceptAny => HostKeyPolicy::AcceptAny,
            HostKeyArg::KnownHosts => HostKeyPolicy::KnownHosts,
            HostKeyArg::TrustOnFirstUse => HostKeyPolicy::TrustOnFirstUse,
        }
    }
}
