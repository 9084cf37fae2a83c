// ABOUTME: SSH server target parsed from "[user@]host[:port]".
// ABOUTME: Port defaults to 22; the user falls back to the invoking user.

use std::fmt;
use thiserror::Error;

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("server address cannot be empty")]
    Empty,

    #[error("a username must be specified before the @ sign")]
    MissingUser,

    #[error("a server address must be specified after the @ sign")]
    MissingHost,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("no username given and neither USER nor USERNAME is set")]
    UnknownUser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl ServerTarget {
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetError::Empty);
        }

        let (user, rest) = match s.find('@') {
            Some(0) => return Err(TargetError::MissingUser),
            Some(at) if at == s.len() - 1 => return Err(TargetError::MissingHost),
            Some(at) => (Some(&s[..at]), &s[at + 1..]),
            None => (None, s),
        };

        let (host, port) = split_host_port(rest)?;
        if host.is_empty() {
            return Err(TargetError::MissingHost);
        }

        Ok(Self {
            user: user.map(str::to_string),
            host: host.to_string(),
            port,
        })
    }

    /// The explicit user, or the invoking user from the environment.
    pub fn user_or_current(&self) -> Result<String, TargetError> {
        if let Some(user) = &self.user {
            return Ok(user.clone());
        }
        ["USER", "USERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|user| !user.is_empty())
            .ok_or(TargetError::UnknownUser)
    }
}

fn split_host_port(s: &str) -> Result<(&str, u16), TargetError> {
    // [v6-addr] or [v6-addr]:port
    if let Some(bracketed) = s.strip_prefix('[') {
        let Some((host, after)) = bracketed.split_once(']') else {
            return Err(TargetError::MissingHost);
        };
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, parse_port(port)?)),
            None if after.is_empty() => Ok((host, DEFAULT_SSH_PORT)),
            None => Err(TargetError::InvalidPort(after.to_string())),
        };
    }

    // A bare IPv6 address has several colons and no port.
    if s.matches(':').count() > 1 {
        return Ok((s, DEFAULT_SSH_PORT));
    }

    match s.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((s, DEFAULT_SSH_PORT)),
    }
}

fn parse_port(s: &str) -> Result<u16, TargetError> {
    s.parse::<u16>()
        .map_err(|_| TargetError::InvalidPort(s.to_string()))
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
