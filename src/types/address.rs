// ABOUTME: Network addresses in `network:address` form.
// ABOUTME: The network kind is resolved once at parse time into a closed enum.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address cannot be empty")]
    Empty,

    #[error("unknown network '{0}' (expected tcp, udp, ip or unix)")]
    UnknownNetwork(String),

    #[error("missing address after network '{0}'")]
    MissingTarget(String),
}

/// The closed set of network kinds an address can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    Stream,
    Datagram,
    RawIp,
    Local,
}

impl NetworkKind {
    /// Match a network tag by its first two characters.
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.get(..2)?.to_ascii_lowercase().as_str() {
            "tc" => Some(Self::Stream),
            "ud" => Some(Self::Datagram),
            "ip" => Some(Self::RawIp),
            "un" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "tcp",
            Self::Datagram => "udp",
            Self::RawIp => "ip",
            Self::Local => "unix",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local or remote endpoint.
///
/// Host names are kept unresolved; resolution happens where the address is
/// used (locally when binding, on the server when dialing through a tunnel).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// TCP `host:port`.
    Stream(String),
    /// UDP `host:port`.
    Datagram(String),
    /// Raw IP host.
    RawIp(String),
    /// Unix domain socket path.
    Local(PathBuf),
}

impl Address {
    /// Parse `network:address`. Without a network tag the address is TCP.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let Some((tag, rest)) = s.split_once(':') else {
            // No colon at all, e.g. a bare host name.
            return Ok(Self::Stream(s.to_string()));
        };

        let is_port = |p: &str| p.parse::<u16>().is_ok();

        if !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            if let Some(kind) = NetworkKind::from_tag(tag) {
                if rest.is_empty() {
                    return Err(AddressError::MissingTarget(tag.to_string()));
                }
                return Ok(Self::with_kind(kind, rest));
            }
            // `localhost:8080`: a plain host name followed by a port.
            if is_port(rest) {
                return Ok(Self::Stream(s.to_string()));
            }
            return Err(AddressError::UnknownNetwork(tag.to_string()));
        }

        // `db.internal:5432`, `[::1]:22`, `:8080`: cannot be a tag, so TCP.
        if s.rsplit_once(':').is_some_and(|(_, port)| is_port(port)) {
            return Ok(Self::Stream(s.to_string()));
        }

        Err(AddressError::UnknownNetwork(tag.to_string()))
    }

    fn with_kind(kind: NetworkKind, target: &str) -> Self {
        match kind {
            NetworkKind::Stream => Self::Stream(target.to_string()),
            NetworkKind::Datagram => Self::Datagram(target.to_string()),
            NetworkKind::RawIp => Self::RawIp(target.to_string()),
            NetworkKind::Local => Self::Local(PathBuf::from(target)),
        }
    }

    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Stream(_) => NetworkKind::Stream,
            Self::Datagram(_) => NetworkKind::Datagram,
            Self::RawIp(_) => NetworkKind::RawIp,
            Self::Local(_) => NetworkKind::Local,
        }
    }

    /// Split a `host:port` target into its parts. IPv6 hosts may be bracketed.
    ///
    /// Returns `None` for Unix paths, raw IP hosts and targets without a
    /// numeric port.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let target = match self {
            Self::Stream(t) | Self::Datagram(t) => t.as_str(),
            Self::RawIp(_) | Self::Local(_) => return None,
        };
        let (host, port) = target.rsplit_once(':')?;
        let port = port.parse().ok()?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Some((host, port))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            _ => None,
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(t) | Self::Datagram(t) | Self::RawIp(t) => {
                write!(f, "{}:{}", self.kind(), t)
            }
            Self::Local(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}
