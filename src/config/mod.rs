// ABOUTME: Configuration types and parsing for catapult.yml.
// ABOUTME: Handles YAML parsing, env-backed secrets, and file discovery.

mod env_value;

pub use env_value::EnvValue;

use crate::error::{Error, Result};
use crate::ssh::HostKeyPolicy;
use crate::types::{Address, Principal};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "catapult.yml";
pub const CONFIG_FILENAME_ALT: &str = "catapult.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".catapult/config.yml";

/// Name of the token file Vault's own CLI writes in the home directory.
pub const VAULT_TOKEN_FILE: &str = ".vault-token";

/// Settings read from the optional config file. Every field may also be
/// given on the command line, which takes precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default)]
    pub public_key: Option<PathBuf>,

    #[serde(default)]
    pub local: Option<Address>,

    #[serde(default)]
    pub remote: Option<Address>,

    #[serde(default, deserialize_with = "deserialize_principal")]
    pub principal: Option<Principal>,

    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    #[serde(default)]
    pub vault: VaultSection,

    #[serde(default)]
    pub host_key: HostKeySection,

    #[serde(default)]
    pub relay: RelaySection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultSection {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub token: Option<EnvValue>,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostKeySection {
    #[serde(default)]
    pub policy: Option<HostKeyPolicy>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    #[serde(default)]
    pub max_connections: Option<usize>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document is a valid, empty config.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        match Self::find(dir) {
            Some(path) => Self::load(&path),
            None => Err(Error::ConfigNotFound(dir.to_path_buf())),
        }
    }

    /// First existing config file in `dir`, in priority order.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Vault token from the config file, resolving env references.
    pub fn vault_token(&self) -> Result<Option<String>> {
        self.vault.token.as_ref().map(EnvValue::resolve).transpose()
    }
}

/// Read the token left by `vault login`, if any.
pub fn read_token_file(home: &Path) -> Option<String> {
    let content = std::fs::read_to_string(home.join(VAULT_TOKEN_FILE)).ok()?;
    let token = content.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn deserialize_principal<'de, D>(deserializer: D) -> std::result::Result<Option<Principal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map(|s| Principal::new(&s).map_err(serde::de::Error::custom))
        .transpose()
}
